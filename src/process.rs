//! Process lifecycle manager.
//!
//! Spawns the child with stdin closed and both output streams piped, starts
//! one drainer thread per pipe before returning (so a chatty child can
//! never deadlock on a full pipe buffer), and, when a timeout is
//! configured, a watchdog thread that shares a lock-guarded completion
//! record with the main path. The watchdog's decision is linearized with
//! the main path solely through that lock; on timeout the watchdog runs
//! the termination protocol in [`crate::terminate`] to completion before
//! recording its decision, so neither a join nor a `status()` poll can
//! observe a timeout with the child still alive.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::LeashError;
use crate::output::RunOutput;
use crate::terminate;
use crate::validate;

/// Polling interval for the watchdog, the main path's completion wait, and
/// the terminator's grace-period checks. Timeout resolution is bounded by
/// this interval.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on bytes read from each of stdout / stderr to prevent
/// unbounded memory use (10 MiB).
const MAX_CAPTURE_BYTES: u64 = 10 * 1024 * 1024;

/// Lock a mutex, recovering from poisoning. A poisoned lock only means
/// another worker panicked mid-update; the guarded state remains usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared record through which the watchdog and the main path agree on the
/// run outcome. Read-then-act always happens under the lock.
#[derive(Debug, Default)]
struct CompletionState {
    completed: bool,
    timed_out: bool,
}

/// Observable state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    /// No process has been spawned yet.
    #[default]
    NotExecuted,
    Running,
    /// Process exited; the code is `None` when the OS reported none
    /// (signal termination on Unix).
    Completed(Option<i32>),
    /// Terminal: reached only via the watchdog. Observing this state
    /// implies the termination protocol already ran.
    TimedOut,
}

/// Outcome of [`execute`]: a finished run or a detached handle, depending
/// on `config.wait`.
#[derive(Debug)]
pub enum Execution {
    Finished(RunOutput),
    Detached(ExecutionHandle),
}

/// A live spawned process plus its drainer and watchdog threads.
///
/// Dropping the handle detaches the run: the child keeps executing and the
/// drainer threads keep consuming its pipes until they close.
#[derive(Debug)]
pub struct ExecutionHandle {
    program: String,
    pid: u32,
    child: Arc<Mutex<Child>>,
    state: Arc<Mutex<CompletionState>>,
    stdout_drain: JoinHandle<std::io::Result<Vec<u8>>>,
    stderr_drain: JoinHandle<std::io::Result<Vec<u8>>>,
    watchdog: Option<JoinHandle<()>>,
    timeout_sec: i64,
}

/// Validate `config`, spawn the process and start its drainers (plus the
/// watchdog when a timeout is configured). Returns immediately; the buffers
/// keep filling asynchronously behind the handle.
pub fn spawn_run(config: &RunConfig) -> Result<ExecutionHandle, LeashError> {
    validate::validate(config)?;

    let mut child = Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| LeashError::Spawn {
            program: config.program.clone(),
            detail: e.to_string(),
        })?;

    let pid = child.id();

    // We set Stdio::piped() above, so take() always returns Some. Both
    // drainers must be running before anyone blocks on the child.
    let stdout_pipe = child.stdout.take().expect("stdout was piped");
    let stderr_pipe = child.stderr.take().expect("stderr was piped");
    let stdout_drain = thread::spawn(move || drain(stdout_pipe));
    let stderr_drain = thread::spawn(move || drain(stderr_pipe));

    let child = Arc::new(Mutex::new(child));
    let state = Arc::new(Mutex::new(CompletionState::default()));

    let watchdog = if config.has_timeout() {
        let child = Arc::clone(&child);
        let state = Arc::clone(&state);
        let timeout_sec = config.timeout_sec;
        let kill_grace = Duration::from_millis(config.kill_grace_ms);
        Some(thread::spawn(move || {
            watchdog(child, state, timeout_sec, kill_grace, pid)
        }))
    } else {
        None
    };

    info!(
        pid,
        program = %config.program,
        timeout_sec = config.timeout_sec,
        "process spawned"
    );

    Ok(ExecutionHandle {
        program: config.program.clone(),
        pid,
        child,
        state,
        stdout_drain,
        stderr_drain,
        watchdog,
        timeout_sec: config.timeout_sec,
    })
}

/// Run `config` end to end: spawn, then either wait according to the
/// configured policy or hand back the detached handle.
pub fn execute(config: &RunConfig) -> Result<Execution, LeashError> {
    let handle = spawn_run(config)?;
    if config.wait {
        handle.join().map(Execution::Finished)
    } else {
        Ok(Execution::Detached(handle))
    }
}

impl ExecutionHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Poll the current state without blocking.
    pub fn status(&self) -> RunStatus {
        if lock(&self.state).timed_out {
            return RunStatus::TimedOut;
        }
        match lock(&self.child).try_wait() {
            Ok(Some(status)) => RunStatus::Completed(status.code()),
            Ok(None) => RunStatus::Running,
            // The process is no longer observable through this handle.
            Err(_) => RunStatus::Completed(None),
        }
    }

    /// Wait for the run to finish under the policy it was spawned with:
    /// without a watchdog this blocks until the child exits; with one, the
    /// watchdog's decision is joined first and a declared timeout becomes
    /// [`LeashError::Timeout`] after the termination protocol completes.
    pub fn join(mut self) -> Result<RunOutput, LeashError> {
        match self.watchdog.take() {
            None => self.join_unbounded(),
            Some(watchdog) => self.join_bounded(watchdog),
        }
    }

    /// Blocking wait, no timeout: drainers first, then the process.
    fn join_unbounded(self) -> Result<RunOutput, LeashError> {
        let stdout = join_drainer(self.stdout_drain, "stdout", &self.program)?;
        let stderr = join_drainer(self.stderr_drain, "stderr", &self.program)?;

        let status = lock(&self.child).wait().map_err(|e| LeashError::Wait {
            program: self.program.clone(),
            detail: e.to_string(),
        })?;

        info!(pid = self.pid, exit_code = status.code(), "process exited");
        Ok(RunOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }

    /// Blocking wait with an active watchdog. Blocks on the completion flag
    /// with the same poll-and-sleep pattern the watchdog uses, under the
    /// same lock.
    fn join_bounded(self, watchdog: JoinHandle<()>) -> Result<RunOutput, LeashError> {
        let timed_out = loop {
            {
                let state = lock(&self.state);
                if state.completed {
                    break state.timed_out;
                }
            }
            thread::sleep(POLL_INTERVAL);
        };
        let _ = watchdog.join();

        if timed_out {
            // The watchdog ran the termination protocol before setting the
            // flag, so the child is already dead here.

            // Drainer failures at this point are fallout from the
            // abandoned pipes; the timeout is the single failure cause.
            discard_drainer(self.stdout_drain, "stdout", self.pid);
            discard_drainer(self.stderr_drain, "stderr", self.pid);

            return Err(LeashError::Timeout {
                program: self.program,
                timeout_sec: self.timeout_sec,
            });
        }

        let stdout = join_drainer(self.stdout_drain, "stdout", &self.program)?;
        let stderr = join_drainer(self.stderr_drain, "stderr", &self.program)?;

        // The watchdog already reaped via try_wait; wait() returns the
        // cached status.
        let status = lock(&self.child).wait().map_err(|e| LeashError::Wait {
            program: self.program.clone(),
            detail: e.to_string(),
        })?;

        info!(pid = self.pid, exit_code = status.code(), "process exited within timeout");
        Ok(RunOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Watchdog loop: poll child liveness once per tick until the child exits
/// or the tick budget is spent, then record the outcome under the lock.
///
/// On timeout the termination protocol runs *before* `timed_out` is set,
/// so no reader of the flag (the joining main path or a `status()` poll on
/// a detached handle) can observe `TimedOut` while the child is alive.
fn watchdog(
    child: Arc<Mutex<Child>>,
    state: Arc<Mutex<CompletionState>>,
    timeout_sec: i64,
    kill_grace: Duration,
    pid: u32,
) {
    let ticks = (timeout_sec.max(0) as u64).saturating_mul(1000) / POLL_INTERVAL.as_millis() as u64;
    for _ in 0..ticks {
        if child_exited(&child, pid) {
            lock(&state).completed = true;
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }

    // One last liveness check so a process that finished just under the
    // wire is reported as completed, not race-killed.
    if child_exited(&child, pid) {
        lock(&state).completed = true;
        return;
    }

    warn!(pid, timeout_sec, "watchdog declared timeout");
    terminate::terminate(&child, pid, kill_grace);

    let mut state = lock(&state);
    state.timed_out = true;
    state.completed = true;
}

fn child_exited(child: &Mutex<Child>, pid: u32) -> bool {
    match lock(child).try_wait() {
        Ok(Some(_)) => true,
        Ok(None) => false,
        Err(e) => {
            debug!(pid, error = %e, "try_wait failed in watchdog");
            true
        }
    }
}

/// Read up to [`MAX_CAPTURE_BYTES`] from `reader` until the pipe closes.
fn drain(reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.take(MAX_CAPTURE_BYTES).read_to_end(&mut buf)?;
    Ok(buf)
}

fn join_drainer(
    handle: JoinHandle<std::io::Result<Vec<u8>>>,
    stream: &'static str,
    program: &str,
) -> Result<Vec<u8>, LeashError> {
    match handle.join() {
        Ok(Ok(buf)) => Ok(buf),
        Ok(Err(e)) => Err(LeashError::Stream {
            program: program.to_owned(),
            stream,
            detail: e.to_string(),
        }),
        Err(panic) => Err(LeashError::Stream {
            program: program.to_owned(),
            stream,
            detail: format!("drainer thread panicked: {panic:?}"),
        }),
    }
}

/// Join a drainer on the timeout path, suppressing its result. The
/// suppressed cause is logged so diagnostics are not lost entirely.
fn discard_drainer(handle: JoinHandle<std::io::Result<Vec<u8>>>, stream: &'static str, pid: u32) {
    match handle.join() {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => debug!(pid, stream, error = %e, "drainer error suppressed by timeout"),
        Err(_) => debug!(pid, stream, "drainer panic suppressed by timeout"),
    }
}
