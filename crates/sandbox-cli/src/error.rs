use thiserror::Error;

use sandbox_exec::PipelineError;
use sandbox_exec::SessionError;
use sandbox_rpc::ClientError;

/// Anything that aborts a command. Rendered by `main` as a single
/// `sandbox: <message>` line; the exit code is always [`crate::EXIT_FATAL`].
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("{0}")]
    Session(#[from] SessionError),

    #[error("{0}")]
    Stdin(#[from] PipelineError),

    #[error("failed to install signal handler: {0}")]
    SignalSetup(std::io::Error),

    #[error("failed to spawn the stdin pump: {0}")]
    StdinThread(std::io::Error),

    #[error("process did not end after interrupt; giving up")]
    KillTimeout,
}
