//! Extension trait for serde_json::Value to reduce boilerplate in handlers.

use serde_json::Value;

/// Convenient JSON value extraction with defaults.
pub trait ValueExt {
    /// Get a string field or return default.
    fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str;
}

impl ValueExt for Value {
    fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).and_then(|v| v.as_str()).unwrap_or(default)
    }
}
