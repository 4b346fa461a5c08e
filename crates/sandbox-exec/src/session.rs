//! One live remote process.
//!
//! The session owns the demultiplexing of the daemon's event stream: a
//! single receive-loop thread fulfills "start observed" and "end observed"
//! exactly once each, relays output to the caller's sinks as it arrives, and
//! accumulates it for `wait`. All terminal knowledge lives here -- callers
//! never have to decide whether the process finished or the channel died.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;
use std::time::Duration;

use tracing::debug;

use sandbox_common::mutex_lock_or_recover;
use sandbox_rpc::ControlClient;
use sandbox_rpc::ControlTransport;
use sandbox_rpc::EventStream;
use sandbox_rpc::OutputStream;
use sandbox_rpc::Pid;
use sandbox_rpc::Signal;
use sandbox_rpc::StartRequest;
use sandbox_rpc::StreamAbort;
use sandbox_rpc::StreamEvent;

use crate::error::SessionError;

/// Poll interval for abort checks in the receive loop.
const EVENT_POLL: Duration = Duration::from_millis(100);

pub type OutputSink = Box<dyn FnMut(&[u8]) + Send>;

/// Live relay callbacks. Optional; accumulated output is available from
/// `wait` either way.
#[derive(Default)]
pub struct OutputSinks {
    pub stdout: Option<OutputSink>,
    pub stderr: Option<OutputSink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Exited(i32),
    Disconnected,
    Failed(SessionError),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Exited(_) | SessionState::Disconnected | SessionState::Failed(_)
        )
    }
}

/// Outcome of a supervised process. A non-zero `code` is a normal, successful
/// completion of supervision, not a local failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
    pub error: Option<String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

enum WaitSlot {
    Pending(mpsc::Receiver<Result<(i32, Option<String>), SessionError>>),
    Done(Result<ExitStatus, SessionError>),
}

pub struct ProcessSession<T: ControlTransport> {
    client: Arc<ControlClient<T>>,
    pid: Pid,
    state: Arc<Mutex<SessionState>>,
    abort: StreamAbort,
    wait_slot: Mutex<WaitSlot>,
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl<T: ControlTransport + 'static> ProcessSession<T> {
    /// Starts a fresh remote process. Returns once the `start` event is
    /// observed; fails if the stream ends or errors before that.
    pub fn start(
        client: Arc<ControlClient<T>>,
        request: &StartRequest,
        sinks: OutputSinks,
    ) -> Result<Self, SessionError> {
        let stream = client
            .start(request)
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Self::from_stream(client, stream, None, sinks)
    }

    /// Attaches to an already-running process. No synthetic start event; the
    /// pid is known immediately and the session begins in `Running`.
    pub fn attach(
        client: Arc<ControlClient<T>>,
        pid: Pid,
        sinks: OutputSinks,
    ) -> Result<Self, SessionError> {
        let stream = client
            .connect(pid)
            .map_err(|e| SessionError::from_client(pid, e))?;
        Self::from_stream(client, stream, Some(pid), sinks)
    }

    fn from_stream(
        client: Arc<ControlClient<T>>,
        stream: EventStream,
        known_pid: Option<Pid>,
        sinks: OutputSinks,
    ) -> Result<Self, SessionError> {
        let initial = if known_pid.is_some() {
            SessionState::Running
        } else {
            SessionState::Starting
        };
        let state = Arc::new(Mutex::new(initial));
        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let abort = stream.abort_handle();

        let (start_tx, start_rx) = mpsc::channel();
        let (end_tx, end_rx) = mpsc::channel();

        let loop_ctx = ReceiveLoop {
            stream,
            start_tx: if known_pid.is_some() { None } else { Some(start_tx) },
            end_tx,
            pid: known_pid,
            state: state.clone(),
            stdout: stdout.clone(),
            stderr: stderr.clone(),
            sinks,
        };
        std::thread::Builder::new()
            .name("session-events".to_string())
            .spawn(move || loop_ctx.run())
            .map_err(|e| SessionError::Transport(format!("failed to spawn receive loop: {}", e)))?;

        let pid = match known_pid {
            Some(pid) => pid,
            None => match start_rx.recv() {
                Ok(Ok(pid)) => pid,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(SessionError::Transport(
                        "event stream closed before the start event".to_string(),
                    ));
                }
            },
        };

        Ok(Self {
            client,
            pid,
            state,
            abort,
            wait_slot: Mutex::new(WaitSlot::Pending(end_rx)),
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        mutex_lock_or_recover(&self.state).clone()
    }

    pub fn supports_stdin(&self) -> bool {
        self.client.supports_stdin()
    }

    pub fn supports_stdin_close(&self) -> bool {
        self.client.supports_stdin_close()
    }

    /// Resolves on the `end` event. Once terminal, resolves immediately from
    /// cached state. Safe to call while stdin delivery is in flight.
    pub fn wait(&self) -> Result<ExitStatus, SessionError> {
        let mut slot = mutex_lock_or_recover(&self.wait_slot);
        match &*slot {
            WaitSlot::Done(result) => result.clone(),
            WaitSlot::Pending(rx) => {
                let outcome = match rx.recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SessionError::Transport(
                        "receive loop ended without a result".to_string(),
                    )),
                };
                let result = self.finish(outcome);
                *slot = WaitSlot::Done(result.clone());
                result
            }
        }
    }

    /// Like `wait`, but gives up after `timeout`. `None` means the session
    /// is still live.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<ExitStatus, SessionError>> {
        let mut slot = mutex_lock_or_recover(&self.wait_slot);
        match &*slot {
            WaitSlot::Done(result) => Some(result.clone()),
            WaitSlot::Pending(rx) => {
                let outcome = match rx.recv_timeout(timeout) {
                    Ok(outcome) => outcome,
                    Err(mpsc::RecvTimeoutError::Timeout) => return None,
                    Err(mpsc::RecvTimeoutError::Disconnected) => Err(SessionError::Transport(
                        "receive loop ended without a result".to_string(),
                    )),
                };
                let result = self.finish(outcome);
                *slot = WaitSlot::Done(result.clone());
                Some(result)
            }
        }
    }

    fn finish(
        &self,
        outcome: Result<(i32, Option<String>), SessionError>,
    ) -> Result<ExitStatus, SessionError> {
        outcome.map(|(code, error)| ExitStatus {
            code,
            error,
            stdout: mutex_lock_or_recover(&self.stdout).clone(),
            stderr: mutex_lock_or_recover(&self.stderr).clone(),
        })
    }

    /// Sends SIGKILL. A not-found reply means the process is already gone,
    /// which satisfies the intent, so it reports success. Idempotent no-op
    /// once the session is terminal.
    pub fn kill(&self) -> Result<(), SessionError> {
        if self.state().is_terminal() {
            return Ok(());
        }
        match self.client.send_signal(self.pid, Signal::Sigkill) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(SessionError::Transport(e.to_string())),
        }
    }

    /// Stops observing the stream without affecting the remote process.
    /// Idempotent; never errors.
    pub fn disconnect(&self) {
        if !self.state().is_terminal() {
            transition(&self.state, SessionState::Disconnected);
        }
        self.abort.abort();
    }

    /// Forwards one stdin chunk to the remote process.
    pub fn send_stdin(&self, data: &[u8]) -> Result<(), SessionError> {
        self.client
            .send_input(self.pid, data)
            .map_err(|e| SessionError::from_client(self.pid, e))
    }

    /// Half-closes the remote process's stdin.
    pub fn close_stdin(&self) -> Result<(), SessionError> {
        self.client
            .close_stdin(self.pid)
            .map_err(|e| SessionError::from_client(self.pid, e))
    }
}

/// Terminal states are immutable once reached.
fn transition(state: &Mutex<SessionState>, next: SessionState) {
    let mut current = mutex_lock_or_recover(state);
    if !current.is_terminal() {
        *current = next;
    }
}

struct ReceiveLoop {
    stream: EventStream,
    start_tx: Option<mpsc::Sender<Result<Pid, SessionError>>>,
    end_tx: mpsc::Sender<Result<(i32, Option<String>), SessionError>>,
    /// Known from `attach`, or learned from the `start` event; needed to
    /// classify not-found errors arriving on the stream itself.
    pid: Option<Pid>,
    state: Arc<Mutex<SessionState>>,
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    sinks: OutputSinks,
}

impl ReceiveLoop {
    fn run(mut self) {
        let abort = self.stream.abort_handle();
        loop {
            if abort.is_aborted() {
                self.fail(SessionError::Disconnected);
                return;
            }
            match self.stream.recv_timeout(EVENT_POLL) {
                Ok(Ok(StreamEvent::Start { pid })) => {
                    self.pid = Some(pid);
                    transition(&self.state, SessionState::Running);
                    if let Some(tx) = self.start_tx.take() {
                        let _ = tx.send(Ok(pid));
                    }
                }
                Ok(Ok(StreamEvent::Output { stream, data })) => {
                    // Relay first; buffering never blocks delivery.
                    match stream {
                        OutputStream::Stdout => {
                            if let Some(sink) = self.sinks.stdout.as_mut() {
                                sink(&data);
                            }
                            mutex_lock_or_recover(&self.stdout).extend_from_slice(&data);
                        }
                        OutputStream::Stderr => {
                            if let Some(sink) = self.sinks.stderr.as_mut() {
                                sink(&data);
                            }
                            mutex_lock_or_recover(&self.stderr).extend_from_slice(&data);
                        }
                    }
                }
                Ok(Ok(StreamEvent::End { exit_code, error })) => {
                    if let Some(err) = error.as_deref() {
                        debug!(exit_code, error = err, "process ended with daemon error note");
                    }
                    transition(&self.state, SessionState::Exited(exit_code));
                    if let Some(tx) = self.start_tx.take() {
                        // End before start: the caller's start() must not hang.
                        let _ = tx.send(Err(SessionError::Transport(
                            "event stream ended before the start event".to_string(),
                        )));
                    }
                    let _ = self.end_tx.send(Ok((exit_code, error)));
                    return;
                }
                Ok(Err(err)) => {
                    // A deliberate disconnect wins over whatever error the
                    // dying stream delivers in the same poll window.
                    let failure = if abort.is_aborted() {
                        SessionError::Disconnected
                    } else {
                        match self.pid {
                            Some(pid) => SessionError::from_client(pid, err),
                            None => SessionError::Transport(err.to_string()),
                        }
                    };
                    self.fail(failure);
                    return;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    let failure = if abort.is_aborted() {
                        SessionError::Disconnected
                    } else {
                        SessionError::Transport(
                            "event stream closed before the end event".to_string(),
                        )
                    };
                    self.fail(failure);
                    return;
                }
            }
        }
    }

    /// Rejects whichever of start/wait is still pending with the same error.
    fn fail(&mut self, err: SessionError) {
        let next = match &err {
            SessionError::Disconnected => SessionState::Disconnected,
            other => SessionState::Failed(other.clone()),
        };
        transition(&self.state, next);
        if let Some(tx) = self.start_tx.take() {
            let _ = tx.send(Err(err.clone()));
        }
        let _ = self.end_tx.send(Err(err));
    }
}
