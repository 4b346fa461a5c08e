use std::path::PathBuf;

/// Resolves the control socket of a sandbox.
///
/// `SANDBOX_SOCKET` overrides resolution entirely (useful for tests and
/// tunneled setups); otherwise each sandbox id maps to its own socket under
/// the runtime directory.
pub fn socket_path(sandbox_id: &str) -> PathBuf {
    if let Ok(custom_path) = std::env::var("SANDBOX_SOCKET") {
        return PathBuf::from(custom_path);
    }

    std::env::var("XDG_RUNTIME_DIR")
        .map(|dir| PathBuf::from(dir).join(format!("sandbox-{}.sock", sandbox_id)))
        .unwrap_or_else(|_| PathBuf::from(format!("/tmp/sandbox-{}.sock", sandbox_id)))
}
