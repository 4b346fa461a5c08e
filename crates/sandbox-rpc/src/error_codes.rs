//! Semantic error codes for JSON-RPC domain errors.
//!
//! Error codes follow the JSON-RPC 2.0 specification:
//! - -32700 to -32600: Reserved protocol errors
//! - -32000 to -32099: Server errors (we use -32001 to -32020 for domain errors)

/// The referenced process is no longer known to the daemon. Semantically
/// this means "the process already finished" and callers treat it as
/// non-fatal in the contexts where the goal is already satisfied.
pub const PROCESS_NOT_FOUND: i32 = -32001;

/// The daemon itself failed (spawn failure, internal error).
pub const SANDBOX_ERROR: i32 = -32016;

/// Request parameters were malformed.
pub const INVALID_PARAMS: i32 = -32602;

/// Legacy generic error.
pub const GENERIC_ERROR: i32 = -32000;

/// Returns whether an error code means "the referenced pid no longer exists".
pub fn is_not_found(code: i32) -> bool {
    code == PROCESS_NOT_FOUND
}
