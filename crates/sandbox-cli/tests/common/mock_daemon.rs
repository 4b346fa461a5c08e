//! Mock command daemon for exercising the CLI end to end.
//!
//! Listens on a Unix socket in a temp directory and answers newline-delimited
//! JSON-RPC requests from scripted responses. Streaming methods (`start`,
//! `connect`) emit one response line per event. Every request is recorded so
//! tests can assert exact wire shapes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sandbox_common::ValueExt;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

#[derive(Debug, Deserialize)]
struct Request {
    #[allow(unused)]
    jsonrpc: String,
    id: u64,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub params: Option<Value>,
}

/// How the daemon answers one method.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// One successful response line.
    Success(Value),
    /// One error response line.
    Error { code: i32, message: String },
    /// A streaming method: one response line per event payload.
    Stream(Vec<Value>),
    /// Emit the given events, then sever the connection without `end`.
    StreamThenClose(Vec<Value>),
    /// Stateful `start`: keep the stream open, count bytes delivered via
    /// `send_input`, and on `close_stdin` emit the byte count as stdout
    /// followed by `end` with exit code 0. Behaves like `wc -c`.
    CountStdin { pid: u64 },
}

#[derive(Default)]
struct StdinTally {
    bytes: usize,
    closed: bool,
}

pub struct MockDaemon {
    _temp_dir: TempDir,
    socket_path: PathBuf,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handlers: Arc<Mutex<HashMap<String, MockResponse>>>,
    tally: Arc<Mutex<StdinTally>>,
    shutdown: Arc<AtomicBool>,
}

impl MockDaemon {
    pub fn start() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("sandbox-test.sock");

        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let handlers: Arc<Mutex<HashMap<String, MockResponse>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let tally = Arc::new(Mutex::new(StdinTally::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let listener = UnixListener::bind(&socket_path).expect("failed to bind socket");
        let accept_requests = requests.clone();
        let accept_handlers = handlers.clone();
        let accept_tally = tally.clone();
        let accept_shutdown = shutdown.clone();

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                if accept_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { break };
                let requests = accept_requests.clone();
                let handlers = accept_handlers.clone();
                let tally = accept_tally.clone();
                std::thread::spawn(move || {
                    handle_connection(stream, requests, handlers, tally);
                });
            }
        });

        Self {
            _temp_dir: temp_dir,
            socket_path,
            requests,
            handlers,
            tally,
            shutdown,
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    pub fn set_response(&self, method: &str, response: MockResponse) {
        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count_for(&self, method: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub fn last_request_for(&self, method: &str) -> Option<RecordedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.method == method)
            .cloned()
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the blocking accept so the listener thread can exit.
        let _ = UnixStream::connect(&self.socket_path);
    }
}

fn handle_connection(
    stream: UnixStream,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handlers: Arc<Mutex<HashMap<String, MockResponse>>>,
    tally: Arc<Mutex<StdinTally>>,
) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(read_half) => read_half,
        Err(_) => return,
    });
    let mut writer = stream;

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {}
            Err(_) => return,
        }
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                eprintln!("mock daemon: bad request line: {} ({})", line.trim(), err);
                continue;
            }
        };

        requests.lock().unwrap().push(RecordedRequest {
            method: request.method.clone(),
            params: request.params.clone(),
        });

        let handler = handlers.lock().unwrap().get(&request.method).cloned();
        match handler {
            Some(MockResponse::Success(result)) => {
                write_result(&mut writer, request.id, result);
            }
            Some(MockResponse::Error { code, message }) => {
                write_error(&mut writer, request.id, code, &message);
            }
            Some(MockResponse::Stream(events)) => {
                for event in events {
                    write_result(&mut writer, request.id, event);
                }
                return;
            }
            Some(MockResponse::StreamThenClose(events)) => {
                for event in events {
                    write_result(&mut writer, request.id, event);
                }
                // Drop the connection without an end event.
                return;
            }
            Some(MockResponse::CountStdin { pid }) => {
                run_count_stdin(&mut writer, request.id, pid, &tally);
                return;
            }
            None => match request.method.as_str() {
                // Implicit stdin plumbing so CountStdin scripts stay short.
                "send_input" => {
                    let encoded = request
                        .params
                        .as_ref()
                        .map(|p| p.str_or("data", ""))
                        .unwrap_or_default();
                    let decoded = STANDARD.decode(encoded).unwrap_or_default();
                    tally.lock().unwrap().bytes += decoded.len();
                    write_result(&mut writer, request.id, json!({}));
                }
                "close_stdin" => {
                    tally.lock().unwrap().closed = true;
                    write_result(&mut writer, request.id, json!({}));
                }
                other => {
                    write_error(
                        &mut writer,
                        request.id,
                        -32601,
                        &format!("method not found: {}", other),
                    );
                }
            },
        }
    }
}

/// Emits `start`, waits for the stdin tally to close, then reports the byte
/// count as one stdout chunk and exits 0.
fn run_count_stdin(writer: &mut UnixStream, id: u64, pid: u64, tally: &Arc<Mutex<StdinTally>>) {
    write_result(writer, id, json!({ "event": "start", "pid": pid }));

    loop {
        {
            let tally = tally.lock().unwrap();
            if tally.closed {
                let count = tally.bytes.to_string();
                drop(tally);
                write_result(
                    writer,
                    id,
                    json!({
                        "event": "output",
                        "stream": "stdout",
                        "data": STANDARD.encode(count.as_bytes()),
                    }),
                );
                write_result(writer, id, json!({ "event": "end", "exit_code": 0 }));
                return;
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn write_result(writer: &mut UnixStream, id: u64, result: Value) {
    let response = json!({ "jsonrpc": "2.0", "id": id, "result": result });
    write_line(writer, &response);
}

fn write_error(writer: &mut UnixStream, id: u64, code: i32, message: &str) {
    let response = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    });
    write_line(writer, &response);
}

fn write_line(writer: &mut UnixStream, value: &Value) {
    let mut payload = value.to_string();
    payload.push('\n');
    let _ = writer.write_all(payload.as_bytes());
    let _ = writer.flush();
}

/// Event payload helpers shared by the integration tests.
pub fn start_event(pid: u64) -> Value {
    json!({ "event": "start", "pid": pid })
}

pub fn output_event(stream: &str, data: &[u8]) -> Value {
    json!({ "event": "output", "stream": stream, "data": STANDARD.encode(data) })
}

pub fn end_event(exit_code: i32) -> Value {
    json!({ "event": "end", "exit_code": exit_code })
}
