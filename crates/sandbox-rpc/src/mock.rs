//! Scripted in-process transport for tests.
//!
//! Mirrors the daemon contract closely enough to catch real regressions:
//! exact method names and params are recorded for verification, replies are
//! scripted per method, and streams can end cleanly, get severed, or fail
//! mid-flight.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;

use serde_json::Value;
use serde_json::json;

use sandbox_common::mutex_lock_or_recover;

use crate::error::ClientError;
use crate::error_codes;
use crate::transport::ControlTransport;
use crate::transport::EventStream;
use crate::transport::InputChannel;
use crate::transport::StreamAbort;
use crate::transport::TransportCapabilities;
use crate::wire::Pid;
use crate::wire::StreamEvent;

/// One scripted reply. The last reply scripted for a method is sticky: it
/// keeps answering once the queue ahead of it is drained.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Unary success with this result value.
    Success(Value),
    /// Unary or stream-open failure.
    Error { code: i32, message: String },
    /// Stream delivering these events, then closing. If the last event is
    /// not `end`, the stream appears severed (channel closes early).
    Events(Vec<StreamEvent>),
    /// Stream delivering these events, then failing with an RPC error.
    EventsThenError(Vec<StreamEvent>, i32, String),
    /// Stream delivering these events, then staying open until aborted.
    EventsThenHold(Vec<StreamEvent>),
}

impl MockReply {
    pub fn ack() -> Self {
        MockReply::Success(json!({}))
    }

    pub fn not_found(pid: Pid) -> Self {
        MockReply::Error {
            code: error_codes::PROCESS_NOT_FOUND,
            message: format!("process {} not found", pid),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Default)]
struct MockState {
    replies: HashMap<String, VecDeque<MockReply>>,
    calls: Vec<RecordedCall>,
    input_chunks: Vec<Vec<u8>>,
    input_finished: bool,
    // Keeps EventsThenHold streams open until the test drops the transport.
    held: Vec<mpsc::Sender<Result<StreamEvent, ClientError>>>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    caps: TransportCapabilities,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(mut self, caps: TransportCapabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Queue a reply for `method`.
    pub fn script(&self, method: &str, reply: MockReply) {
        let mut state = mutex_lock_or_recover(&self.state);
        state
            .replies
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        mutex_lock_or_recover(&self.state).calls.clone()
    }

    pub fn calls_for(&self, method: &str) -> usize {
        mutex_lock_or_recover(&self.state)
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn input_chunks(&self) -> Vec<Vec<u8>> {
        mutex_lock_or_recover(&self.state).input_chunks.clone()
    }

    pub fn input_finished(&self) -> bool {
        mutex_lock_or_recover(&self.state).input_finished
    }

    fn record(&self, method: &str, params: &Option<Value>) {
        let mut state = mutex_lock_or_recover(&self.state);
        state.calls.push(RecordedCall {
            method: method.to_string(),
            params: params.clone(),
        });
    }

    fn next_reply(&self, method: &str) -> Option<MockReply> {
        let mut state = mutex_lock_or_recover(&self.state);
        let queue = state.replies.get_mut(method)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl ControlTransport for MockTransport {
    fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        self.record(method, &params);
        match self.next_reply(method) {
            Some(MockReply::Success(value)) => Ok(value),
            Some(MockReply::Error { code, message }) => Err(ClientError::Rpc { code, message }),
            // Unscripted unary calls are acked so tests only script what
            // they assert on.
            None => Ok(json!({})),
            Some(other) => panic!("scripted a stream reply for unary method {method}: {other:?}"),
        }
    }

    fn open_stream(&self, method: &str, params: Option<Value>) -> Result<EventStream, ClientError> {
        self.record(method, &params);
        let (tx, rx) = mpsc::channel();
        let abort = StreamAbort::new();

        match self.next_reply(method) {
            Some(MockReply::Events(events)) => {
                for event in events {
                    let _ = tx.send(Ok(event));
                }
            }
            Some(MockReply::EventsThenError(events, code, message)) => {
                for event in events {
                    let _ = tx.send(Ok(event));
                }
                let _ = tx.send(Err(ClientError::Rpc { code, message }));
            }
            Some(MockReply::EventsThenHold(events)) => {
                for event in events {
                    let _ = tx.send(Ok(event));
                }
                mutex_lock_or_recover(&self.state).held.push(tx);
            }
            Some(MockReply::Error { code, message }) => {
                return Err(ClientError::Rpc { code, message });
            }
            Some(MockReply::Success(_)) | None => {
                panic!("no stream scripted for method {method}")
            }
        }

        Ok(EventStream::new(rx, abort))
    }

    fn open_input(&self, _pid: Pid) -> Result<Box<dyn InputChannel>, ClientError> {
        Ok(Box::new(MockInputChannel {
            state: self.state.clone(),
        }))
    }

    fn capabilities(&self) -> TransportCapabilities {
        self.caps
    }
}

struct MockInputChannel {
    state: Arc<Mutex<MockState>>,
}

impl InputChannel for MockInputChannel {
    fn send(&mut self, data: &[u8]) -> Result<(), ClientError> {
        mutex_lock_or_recover(&self.state)
            .input_chunks
            .push(data.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ClientError> {
        mutex_lock_or_recover(&self.state).input_finished = true;
        Ok(())
    }
}
