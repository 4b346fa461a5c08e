use thiserror::Error;

use sandbox_rpc::ClientError;
use sandbox_rpc::Pid;

/// Failure of one process session. Cloneable so a single transport failure
/// can reject both a pending `start` and a pending `wait`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("process {0} no longer exists")]
    NotFound(Pid),

    #[error("session disconnected before the process ended")]
    Disconnected,
}

impl SessionError {
    /// Classifies a client error against the pid this session owns. The
    /// not-found / transport distinction is made here, once, so callers
    /// never inspect error messages.
    pub fn from_client(pid: Pid, err: ClientError) -> Self {
        if err.is_not_found() {
            SessionError::NotFound(pid)
        } else {
            SessionError::Transport(err.to_string())
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NotFound(_))
    }
}

/// Failure of the stdin pipeline. Every variant is fatal; the non-fatal
/// cases (process already exited) are reported through
/// [`StdinDelivery::Interrupted`](crate::stdin::StdinDelivery) instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("stdin chunk size must be positive (got {0})")]
    InvalidChunkSize(usize),

    #[error("failed to read piped stdin: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to deliver stdin: {0}")]
    Deliver(#[source] SessionError),

    #[error("failed to close remote stdin: {0}")]
    Close(#[source] SessionError),
}
