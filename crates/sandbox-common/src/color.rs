use std::io::IsTerminal;
use std::sync::OnceLock;

static NO_COLOR: OnceLock<bool> = OnceLock::new();

pub fn init(no_color_flag: bool) {
    let _ = NO_COLOR
        .set(no_color_flag || std::env::var("NO_COLOR").is_ok() || !std::io::stderr().is_terminal());
}

pub fn is_disabled() -> bool {
    *NO_COLOR.get().unwrap_or(&false)
}

mod codes {
    pub const RESET: &str = "\x1b[0m";
    pub const GREEN: &str = "\x1b[32m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const DIM: &str = "\x1b[90m";
    pub const BOLD: &str = "\x1b[1m";
}

pub struct Colors;

impl Colors {
    pub fn success(text: &str) -> String {
        if is_disabled() {
            text.to_string()
        } else {
            format!("{}{}{}", codes::GREEN, text, codes::RESET)
        }
    }

    pub fn error(text: &str) -> String {
        if is_disabled() {
            text.to_string()
        } else {
            format!("{}{}{}", codes::RED, text, codes::RESET)
        }
    }

    pub fn warning(text: &str) -> String {
        if is_disabled() {
            text.to_string()
        } else {
            format!("{}{}{}", codes::YELLOW, text, codes::RESET)
        }
    }

    pub fn dim(text: &str) -> String {
        if is_disabled() {
            text.to_string()
        } else {
            format!("{}{}{}", codes::DIM, text, codes::RESET)
        }
    }

    pub fn bold(text: &str) -> String {
        if is_disabled() {
            text.to_string()
        } else {
            format!("{}{}{}", codes::BOLD, text, codes::RESET)
        }
    }

    pub fn pid(pid: u32) -> String {
        if is_disabled() {
            pid.to_string()
        } else {
            format!("{}{}{}{}", codes::BOLD, codes::CYAN, pid, codes::RESET)
        }
    }
}
