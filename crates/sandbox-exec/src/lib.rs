#![deny(clippy::all)]

//! Remote command execution on top of [`sandbox_rpc`].
//!
//! A [`ProcessSession`] supervises one remote process: it demultiplexes the
//! daemon's event stream into "start observed", live output, and "end
//! observed", and exposes `wait`/`kill`/`disconnect`. The stdin pipeline
//! forwards locally piped input into a session in bounded chunks.

pub mod error;
pub mod session;
pub mod shell;
pub mod stdin;

pub use error::PipelineError;
pub use error::SessionError;
pub use session::ExitStatus;
pub use session::OutputSinks;
pub use session::ProcessSession;
pub use session::SessionState;
pub use shell::build_command_line;
pub use shell::quote;
pub use stdin::ChunkReader;
pub use stdin::MAX_CHUNK_BYTES;
pub use stdin::StdinDelivery;
pub use stdin::pump;
pub use stdin::stdin_is_piped;
