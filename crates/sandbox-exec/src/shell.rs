//! POSIX-shell-safe command line construction.

use std::borrow::Cow;

/// Characters that never need quoting in a POSIX shell word.
fn is_safe_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'_' | b'@' | b'%' | b'+' | b'=' | b':' | b',' | b'.' | b'/' | b'-'
        )
}

/// Shell-quotes one argument. Safe arguments pass through untouched; the
/// empty string renders as `''`; everything else is single-quoted with
/// embedded single quotes rendered as `'"'"'`.
pub fn quote(arg: &str) -> Cow<'_, str> {
    if !arg.is_empty() && arg.bytes().all(is_safe_byte) {
        return Cow::Borrowed(arg);
    }
    Cow::Owned(format!("'{}'", arg.replace('\'', r#"'"'"'"#)))
}

/// Builds a single shell line from an argument vector.
///
/// A single argument is assumed to already be a complete shell line and is
/// passed through verbatim; multiple arguments are independently quoted and
/// joined with single spaces.
pub fn build_command_line(args: &[String]) -> String {
    match args {
        [single] => single.clone(),
        _ => args
            .iter()
            .map(|arg| quote(arg))
            .collect::<Vec<_>>()
            .join(" "),
    }
}
