use thiserror::Error;

use crate::error_codes;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to connect to sandbox daemon: {0}")]
    ConnectionFailed(#[from] std::io::Error),

    #[error("failed to serialize request: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("RPC error ({code}): {message}")]
    Rpc { code: i32, message: String },

    #[error("sandbox daemon not running")]
    DaemonNotRunning,

    #[error("invalid response from daemon")]
    InvalidResponse,

    #[error("event stream closed before completion")]
    StreamClosed,
}

impl ClientError {
    /// "The referenced pid is no longer known to the daemon." All other
    /// variants and codes are transport failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Rpc { code, .. } if error_codes::is_not_found(*code))
    }

    pub fn not_found(pid: crate::wire::Pid) -> Self {
        ClientError::Rpc {
            code: error_codes::PROCESS_NOT_FOUND,
            message: format!("process {} not found", pid),
        }
    }
}
