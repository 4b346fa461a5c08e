//! Transport over the daemon's newline-delimited JSON-RPC protocol.
//!
//! Every call opens its own connection: unary calls write one request line
//! and read one response line; streaming calls keep the connection open and
//! read one response line per event until the `end` event. Each stream is
//! bound to a [`StreamAbort`] scope -- releasing it stops local consumption
//! without affecting the remote process.

use std::io::BufReader;
use std::io::Read;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ClientError;
use crate::wire::StreamEvent;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Poll interval for the stream reader's abort checks.
const STREAM_READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize)]
struct Request {
    jsonrpc: String,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl Request {
    fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: REQUEST_ID.fetch_add(1, Ordering::SeqCst),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

fn parse_response_line(line: &str) -> Result<Value, ClientError> {
    let response: Response = serde_json::from_str(line)?;
    if let Some(error) = response.error {
        return Err(ClientError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    response.result.ok_or(ClientError::InvalidResponse)
}

/// Static client-side capability flags for the negotiated transport.
///
/// The daemon's stdin support is not version-handshaked; embedders configure
/// it when constructing the transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportCapabilities {
    /// The daemon accepts `send_input` for processes started with stdin.
    pub stdin: bool,
    /// The daemon accepts an explicit `close_stdin` half-close.
    pub stdin_close: bool,
}

impl Default for TransportCapabilities {
    fn default() -> Self {
        Self {
            stdin: true,
            stdin_close: true,
        }
    }
}

/// Cancellation scope of one streaming call. Cloneable; `abort` is
/// idempotent and never errors. Aborting stops local consumption only --
/// the remote process is unaffected unless explicitly signalled.
#[derive(Debug, Clone, Default)]
pub struct StreamAbort(Arc<AtomicBool>);

impl StreamAbort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receiving side of one `start`/`connect` stream.
///
/// Yields events in transport order. The channel closes after the `end`
/// event, after an error, or once the abort scope is released.
pub struct EventStream {
    rx: mpsc::Receiver<Result<StreamEvent, ClientError>>,
    abort: StreamAbort,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<Result<StreamEvent, ClientError>>, abort: StreamAbort) -> Self {
        Self { rx, abort }
    }

    /// Blocks for the next event. `None` means the stream is finished
    /// (terminated, errored, or aborted).
    pub fn recv(&self) -> Option<Result<StreamEvent, ClientError>> {
        self.rx.recv().ok()
    }

    /// Bounded variant of [`recv`](Self::recv) so consumers can interleave
    /// abort checks with waiting.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Result<StreamEvent, ClientError>, mpsc::RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Handle used to release this stream's cancellation scope.
    pub fn abort_handle(&self) -> StreamAbort {
        self.abort.clone()
    }
}

/// Writer side of a `stream_input` call: ordered chunks, one ack each.
pub trait InputChannel: Send {
    fn send(&mut self, data: &[u8]) -> Result<(), ClientError>;

    /// Flushes the final ack. Must be called exactly once after the last
    /// chunk.
    fn finish(&mut self) -> Result<(), ClientError>;
}

/// A bidirectional-streaming connection to one sandbox's command daemon.
pub trait ControlTransport: Send + Sync {
    /// One request line, one response line.
    fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError>;

    /// One request line, then a stream of event lines consumed by a reader
    /// task until `end` (or until the returned scope is aborted).
    fn open_stream(&self, method: &str, params: Option<Value>) -> Result<EventStream, ClientError>;

    /// Opens the `stream_input` channel for a pid.
    fn open_input(&self, pid: crate::wire::Pid) -> Result<Box<dyn InputChannel>, ClientError>;

    fn capabilities(&self) -> TransportCapabilities;
}

/// Production transport: Unix domain socket, connection per call.
#[derive(Debug)]
pub struct UnixTransport {
    path: PathBuf,
    caps: TransportCapabilities,
}

impl UnixTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            caps: TransportCapabilities::default(),
        }
    }

    /// Fails fast with `DaemonNotRunning` when the socket does not exist.
    pub fn connect(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        if !path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }
        Ok(Self::new(path))
    }

    pub fn with_capabilities(mut self, caps: TransportCapabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self, read_timeout: Duration) -> Result<UnixStream, ClientError> {
        let stream = UnixStream::connect(&self.path)?;
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        Ok(stream)
    }

    fn write_request(
        stream: &mut UnixStream,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ClientError> {
        let request = Request::new(method, params);
        let request_json = serde_json::to_string(&request)?;
        writeln!(stream, "{}", request_json)?;
        stream.flush()?;
        Ok(())
    }
}

impl ControlTransport for UnixTransport {
    fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let mut stream = self.open(CALL_TIMEOUT)?;
        Self::write_request(&mut stream, method, params)?;

        let mut reader = BufReader::new(&stream);
        let line = read_line_blocking(&mut reader)?;
        parse_response_line(&line)
    }

    fn open_stream(&self, method: &str, params: Option<Value>) -> Result<EventStream, ClientError> {
        let mut stream = self.open(STREAM_READ_TIMEOUT)?;
        Self::write_request(&mut stream, method, params)?;

        let abort = StreamAbort::new();
        let (tx, rx) = mpsc::channel();
        let reader_abort = abort.clone();
        std::thread::Builder::new()
            .name(format!("{}-stream", method))
            .spawn(move || stream_reader_loop(stream, tx, reader_abort))
            .map_err(ClientError::ConnectionFailed)?;

        Ok(EventStream::new(rx, abort))
    }

    fn open_input(&self, pid: crate::wire::Pid) -> Result<Box<dyn InputChannel>, ClientError> {
        let mut stream = self.open(CALL_TIMEOUT)?;
        Self::write_request(&mut stream, "stream_input", Some(serde_json::json!({ "pid": pid })))?;
        Ok(Box::new(UnixInputChannel { stream }))
    }

    fn capabilities(&self) -> TransportCapabilities {
        self.caps
    }
}

struct UnixInputChannel {
    stream: UnixStream,
}

impl InputChannel for UnixInputChannel {
    fn send(&mut self, data: &[u8]) -> Result<(), ClientError> {
        use base64::Engine;
        let frame = serde_json::json!({ "data": base64::engine::general_purpose::STANDARD.encode(data) });
        writeln!(self.stream, "{}", frame)?;
        self.stream.flush()?;

        let mut reader = BufReader::new(&self.stream);
        let line = read_line_blocking(&mut reader)?;
        parse_response_line(&line).map(|_| ())
    }

    fn finish(&mut self) -> Result<(), ClientError> {
        writeln!(self.stream, "{}", serde_json::json!({ "done": true }))?;
        self.stream.flush()?;

        let mut reader = BufReader::new(&self.stream);
        let line = read_line_blocking(&mut reader)?;
        parse_response_line(&line).map(|_| ())
    }
}

/// Reads one newline-terminated line. A read timeout fails the call; only
/// the stream reader loop tolerates timeout wakeups (it polls for aborts).
fn read_line_blocking<R: Read>(reader: &mut R) -> Result<String, ClientError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Err(ClientError::StreamClosed),
            Ok(_) => {
                if byte[0] == b'\n' {
                    return String::from_utf8(buf)
                        .map_err(|_| ClientError::InvalidResponse);
                }
                buf.push(byte[0]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ClientError::ConnectionFailed(e)),
        }
    }
}

/// Consumes event lines until `end`, an error, EOF, or abort. Runs on its
/// own thread; delivery order matches transport order.
fn stream_reader_loop(
    stream: UnixStream,
    tx: mpsc::Sender<Result<StreamEvent, ClientError>>,
    abort: StreamAbort,
) {
    let mut reader = BufReader::new(stream);
    let mut pending = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut ended = false;

    'read: loop {
        if abort.is_aborted() {
            break;
        }
        match reader.read(&mut chunk) {
            Ok(0) => {
                if !ended {
                    let _ = tx.send(Err(ClientError::StreamClosed));
                }
                break;
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_response_line(&line)
                        .and_then(|v| serde_json::from_value(v).map_err(Into::into))
                    {
                        Ok(event) => {
                            let is_end = matches!(event, StreamEvent::End { .. });
                            if tx.send(Ok(event)).is_err() {
                                break 'read;
                            }
                            if is_end {
                                ended = true;
                                break 'read;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "event stream terminated with error");
                            let _ = tx.send(Err(e));
                            break 'read;
                        }
                    }
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                let _ = tx.send(Err(ClientError::ConnectionFailed(e)));
                break;
            }
        }
    }
}
