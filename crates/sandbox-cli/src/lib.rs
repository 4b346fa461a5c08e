#![deny(clippy::all)]

pub mod commands;
pub mod error;
pub mod exec;
pub mod handlers;
pub mod telemetry;

pub use error::CliError;
pub use exec::EXIT_FATAL;
