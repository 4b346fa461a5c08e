//! The `exec` orchestration: start a remote process, relay its output,
//! forward piped stdin and local interrupts, and finish with its exit code.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;
use std::time::Instant;

use signal_hook::consts::signal::SIGINT;
use signal_hook::consts::signal::SIGTERM;
use signal_hook::iterator::Signals;
use tracing::debug;
use tracing::info;

use sandbox_common::Colors;
use sandbox_exec::MAX_CHUNK_BYTES;
use sandbox_exec::OutputSinks;
use sandbox_exec::PipelineError;
use sandbox_exec::ProcessSession;
use sandbox_exec::SessionError;
use sandbox_exec::StdinDelivery;
use sandbox_exec::build_command_line;
use sandbox_exec::pump;
use sandbox_exec::stdin_is_piped;
use sandbox_rpc::ControlClient;
use sandbox_rpc::ControlTransport;
use sandbox_rpc::Pid;
use sandbox_rpc::StartRequest;
use sandbox_rpc::UnixTransport;
use sandbox_rpc::socket_path;

use crate::error::CliError;

/// Exit code for local failures, distinct from any remote exit code the
/// daemon reports. Matches the convention of wrapper tools like timeout(1).
pub const EXIT_FATAL: i32 = 125;

/// How often the supervision loop checks stdin progress and interrupts.
const SUPERVISE_POLL: Duration = Duration::from_millis(150);

/// After forwarding an interrupt as SIGKILL, how long to wait for the
/// daemon's end event before giving up locally.
const KILL_GRACE: Duration = Duration::from_secs(5);

pub struct ExecArgs {
    pub sandbox_id: String,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    pub command: Vec<String>,
}

/// Runs a command to completion inside a sandbox. Returns the remote exit
/// code; every error path maps to [`EXIT_FATAL`] in `main`.
pub fn run_exec(args: ExecArgs) -> Result<i32, CliError> {
    let transport = UnixTransport::connect(socket_path(&args.sandbox_id))?;
    let client = Arc::new(ControlClient::new(transport));

    // The piped-stdin decision is made once, before start, so the daemon
    // knows whether to keep the process's stdin open.
    let piped = stdin_is_piped();
    let forward_stdin = piped && client.supports_stdin();
    if piped && !forward_stdin {
        eprintln!("{}", Colors::warning("Ignoring piped stdin."));
    }

    let mut request = StartRequest::new(build_command_line(&args.command));
    request.cwd = args.cwd;
    request.envs = args.env.into_iter().collect();
    request.stdin = forward_stdin;

    let session = Arc::new(ProcessSession::start(client, &request, relay_sinks())?);
    debug!(pid = session.pid(), cmd = %request.cmd, "process started");

    let interrupted = Arc::new(AtomicBool::new(false));
    let kill_target = session.clone();
    let _signals = SignalForwarder::install(interrupted.clone(), move || {
        if let Err(err) = kill_target.kill() {
            debug!(error = %err, "kill after interrupt failed");
        }
    })?;

    let stdin_rx = if forward_stdin {
        Some(spawn_stdin_pump(session.clone())?)
    } else {
        None
    };

    supervise(&session, stdin_rx, &interrupted)
}

/// Streams a running process's output until it ends. An interrupt detaches
/// locally and leaves the process running.
pub fn run_attach(sandbox_id: &str, pid: Pid) -> Result<i32, CliError> {
    let transport = UnixTransport::connect(socket_path(sandbox_id))?;
    let client = Arc::new(ControlClient::new(transport));

    let session = Arc::new(ProcessSession::attach(client, pid, relay_sinks())?);
    let interrupted = Arc::new(AtomicBool::new(false));
    let detach_target = session.clone();
    let _signals =
        SignalForwarder::install(interrupted.clone(), move || detach_target.disconnect())?;

    match session.wait() {
        Ok(status) => Ok(status.code),
        Err(SessionError::Disconnected) if interrupted.load(Ordering::SeqCst) => {
            eprintln!(
                "{}",
                Colors::dim(&format!("Detached from process {}. It keeps running.", pid))
            );
            Ok(0)
        }
        Err(err) => Err(err.into()),
    }
}

/// Raw byte relay to the local stdout/stderr, flushed per chunk so partial
/// lines (prompts, progress bars) appear as they arrive.
fn relay_sinks() -> OutputSinks {
    OutputSinks {
        stdout: Some(Box::new(|data: &[u8]| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(data);
            let _ = out.flush();
        })),
        stderr: Some(Box::new(|data: &[u8]| {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(data);
            let _ = err.flush();
        })),
    }
}

type StdinOutcome = Result<StdinDelivery, PipelineError>;

fn spawn_stdin_pump<T: ControlTransport + 'static>(
    session: Arc<ProcessSession<T>>,
) -> Result<mpsc::Receiver<StdinOutcome>, CliError> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("stdin-pump".to_string())
        .spawn(move || {
            let outcome = pump(std::io::stdin(), &session, MAX_CHUNK_BYTES);
            let _ = tx.send(outcome);
        })
        .map_err(CliError::StdinThread)?;
    Ok(rx)
}

/// Joins the process's end with the stdin pipeline's outcome. A fatal stdin
/// failure wins over the end event: the session is severed and no further
/// wait or kill is issued.
fn supervise<T: ControlTransport + 'static>(
    session: &ProcessSession<T>,
    mut stdin_rx: Option<mpsc::Receiver<StdinOutcome>>,
    interrupted: &AtomicBool,
) -> Result<i32, CliError> {
    let mut interrupted_at: Option<Instant> = None;

    loop {
        if let Some(rx) = stdin_rx.as_ref() {
            match rx.try_recv() {
                Ok(Ok(StdinDelivery::Complete)) => {
                    stdin_rx = None;
                }
                Ok(Ok(StdinDelivery::Interrupted)) => {
                    eprintln!(
                        "{}",
                        Colors::warning(
                            "Warning: the process exited before stdin was fully delivered."
                        )
                    );
                    stdin_rx = None;
                }
                Ok(Err(err)) => {
                    session.disconnect();
                    return Err(err.into());
                }
                Err(mpsc::TryRecvError::Empty) => {}
                Err(mpsc::TryRecvError::Disconnected) => {
                    stdin_rx = None;
                }
            }
        }

        if let Some(result) = session.wait_timeout(SUPERVISE_POLL) {
            let status = result?;
            if let Some(note) = status.error.as_deref() {
                debug!(exit_code = status.code, note, "daemon reported an error note");
            }
            return Ok(status.code);
        }

        if interrupted.load(Ordering::SeqCst) {
            let since = interrupted_at.get_or_insert_with(Instant::now);
            if since.elapsed() >= KILL_GRACE {
                return Err(CliError::KillTimeout);
            }
        }
    }
}

/// SIGINT/SIGTERM watcher. Runs `action` on each delivery (kill for exec,
/// disconnect for attach) and marks the interruption for the supervision
/// loop. Unregisters when dropped.
struct SignalForwarder {
    handle: signal_hook::iterator::Handle,
}

impl SignalForwarder {
    fn install<F>(interrupted: Arc<AtomicBool>, action: F) -> Result<Self, CliError>
    where
        F: Fn() + Send + 'static,
    {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(CliError::SignalSetup)?;
        let handle = signals.handle();
        std::thread::Builder::new()
            .name("signal-forwarder".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    info!(signal, "interrupt received");
                    interrupted.store(true, Ordering::SeqCst);
                    action();
                }
            })
            .map_err(CliError::SignalSetup)?;
        Ok(Self { handle })
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.handle.close();
    }
}
