//! Typed RPC surface of the command daemon.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use crate::error::ClientError;
use crate::transport::ControlTransport;
use crate::transport::EventStream;
use crate::transport::InputChannel;
use crate::transport::TransportCapabilities;
use crate::wire::Pid;
use crate::wire::ProcessInfo;
use crate::wire::ProcessUpdate;
use crate::wire::Signal;
use crate::wire::StartRequest;

/// Maps each daemon RPC 1:1 onto a method. All methods take `&self`; the
/// transport opens a connection per call, so a client can be shared across
/// the receive loop, the stdin pump, and signal forwarding.
pub struct ControlClient<T: ControlTransport> {
    transport: T,
}

impl<T: ControlTransport> ControlClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn capabilities(&self) -> TransportCapabilities {
        self.transport.capabilities()
    }

    pub fn supports_stdin(&self) -> bool {
        self.transport.capabilities().stdin
    }

    pub fn supports_stdin_close(&self) -> bool {
        self.transport.capabilities().stdin_close
    }

    /// Every process currently alive in the sandbox. No side effects.
    pub fn list(&self) -> Result<Vec<ProcessInfo>, ClientError> {
        let result = self.transport.call("list", None)?;
        let processes = result
            .get("processes")
            .cloned()
            .ok_or(ClientError::InvalidResponse)?;
        serde_json::from_value(processes).map_err(Into::into)
    }

    /// Starts a new process. The stream carries exactly one `start` event,
    /// zero or more `output` events, and exactly one `end` event.
    pub fn start(&self, request: &StartRequest) -> Result<EventStream, ClientError> {
        self.transport
            .open_stream("start", Some(serde_json::to_value(request)?))
    }

    /// Attaches to an already-running process. Never emits a synthetic
    /// `start`; fails with a not-found error if the pid no longer exists.
    pub fn connect(&self, pid: Pid) -> Result<EventStream, ClientError> {
        self.transport
            .open_stream("connect", Some(json!({ "pid": pid })))
    }

    pub fn send_signal(&self, pid: Pid, signal: Signal) -> Result<(), ClientError> {
        self.transport
            .call("send_signal", Some(json!({ "pid": pid, "signal": signal })))?;
        Ok(())
    }

    pub fn send_input(&self, pid: Pid, data: &[u8]) -> Result<(), ClientError> {
        self.transport.call(
            "send_input",
            Some(json!({ "pid": pid, "data": STANDARD.encode(data) })),
        )?;
        Ok(())
    }

    /// Half-closes the process's stdin so it observes EOF.
    pub fn close_stdin(&self, pid: Pid) -> Result<(), ClientError> {
        self.transport
            .call("close_stdin", Some(json!({ "pid": pid })))?;
        Ok(())
    }

    /// Opens the chunked input channel (one ack per chunk).
    pub fn stream_input(&self, pid: Pid) -> Result<Box<dyn InputChannel>, ClientError> {
        self.transport.open_input(pid)
    }

    pub fn update(&self, pid: Pid, delta: &ProcessUpdate) -> Result<(), ClientError> {
        let mut params = serde_json::to_value(delta)?;
        match params.as_object_mut() {
            Some(obj) => {
                obj.insert("pid".to_string(), json!(pid));
            }
            None => return Err(ClientError::InvalidResponse),
        }
        self.transport.call("update", Some(params))?;
        Ok(())
    }
}
