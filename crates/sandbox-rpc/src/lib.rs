#![deny(clippy::all)]

//! RPC client for the sandbox command daemon.
//!
//! The daemon speaks newline-delimited JSON-RPC 2.0 over a Unix domain
//! socket. Unary calls get exactly one response line; streaming calls
//! (`start`, `connect`) get a sequence of response lines, each carrying one
//! process event, terminated by an `end` event.

pub mod client;
pub mod error;
pub mod error_codes;
pub mod mock;
pub mod socket;
pub mod transport;
pub mod wire;

pub use client::ControlClient;
pub use error::ClientError;
pub use mock::MockTransport;
pub use socket::socket_path;
pub use transport::ControlTransport;
pub use transport::EventStream;
pub use transport::InputChannel;
pub use transport::StreamAbort;
pub use transport::TransportCapabilities;
pub use transport::UnixTransport;
pub use wire::OutputStream;
pub use wire::Pid;
pub use wire::ProcessInfo;
pub use wire::ProcessUpdate;
pub use wire::Signal;
pub use wire::StartRequest;
pub use wire::StreamEvent;
