//! Two-stage termination protocol for a timed-out child.
//!
//! Sends a graceful signal first, polls for the process to die for a
//! bounded grace period, then escalates to a forceful, non-catchable kill.
//! "No such process" anywhere in the protocol means the child exited on its
//! own and is treated as a successful termination.

use std::process::Child;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use crate::process::{POLL_INTERVAL, lock};

/// The two stages of the kill protocol. On Unix these map to SIGTERM and
/// SIGKILL; elsewhere both fall back to `Child::kill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    /// Cooperative request to exit; the child may catch it and clean up.
    Graceful,
    /// Non-catchable kill.
    Forceful,
}

enum SendOutcome {
    Sent,
    AlreadyGone,
    Failed(String),
}

/// Terminate `pid` after a confirmed timeout, escalating from graceful to
/// forceful if the child outlives `kill_grace`. Never fails: lookup errors
/// mean the process is already gone, and anything else is logged and
/// ignored since the forceful kill (or the child's own exit) is the
/// backstop. Returns only once the protocol has run to completion, so the
/// caller can surface its timeout error knowing the child is dead.
pub(crate) fn terminate(child: &Mutex<Child>, pid: u32, kill_grace: Duration) {
    debug!(pid, "sending graceful termination signal");
    match send(child, pid, TermSignal::Graceful) {
        SendOutcome::AlreadyGone => {
            debug!(pid, "process already gone before graceful signal");
            let _ = lock(child).wait();
            return;
        }
        SendOutcome::Failed(detail) => {
            warn!(pid, detail = %detail, "graceful signal failed, escalating");
        }
        SendOutcome::Sent => {}
    }

    let ticks = kill_grace.as_millis() / POLL_INTERVAL.as_millis();
    for _ in 0..ticks {
        match lock(child).try_wait() {
            Ok(Some(status)) => {
                debug!(pid, code = status.code(), "process exited after graceful signal");
                return;
            }
            Ok(None) => {}
            // Wait failure: the process is no longer observable through
            // this handle, treat as terminated.
            Err(e) => {
                debug!(pid, error = %e, "wait failed during grace period");
                return;
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    warn!(pid, grace_ms = kill_grace.as_millis() as u64, "still alive after grace period, sending forceful kill");
    match send(child, pid, TermSignal::Forceful) {
        SendOutcome::AlreadyGone => debug!(pid, "process exited between polls"),
        SendOutcome::Failed(detail) => warn!(pid, detail = %detail, "forceful kill failed"),
        SendOutcome::Sent => {}
    }
    // Reap so the killed child does not linger as a zombie.
    let _ = lock(child).wait();
}

#[cfg(unix)]
fn send(_child: &Mutex<Child>, pid: u32, signal: TermSignal) -> SendOutcome {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let sig = match signal {
        TermSignal::Graceful => Signal::SIGTERM,
        TermSignal::Forceful => Signal::SIGKILL,
    };
    match kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => SendOutcome::Sent,
        Err(Errno::ESRCH) => SendOutcome::AlreadyGone,
        Err(e) => SendOutcome::Failed(e.to_string()),
    }
}

#[cfg(not(unix))]
fn send(child: &Mutex<Child>, _pid: u32, _signal: TermSignal) -> SendOutcome {
    // No graceful signal available; both stages are a hard kill.
    match lock(child).kill() {
        Ok(()) => SendOutcome::Sent,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => SendOutcome::AlreadyGone,
        Err(e) => SendOutcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::Instant;

    fn spawn_sleep(seconds: &str) -> (Mutex<Child>, u32) {
        let child = Command::new("sleep")
            .arg(seconds)
            .stdin(Stdio::null())
            .spawn()
            .expect("sleep must spawn");
        let pid = child.id();
        (Mutex::new(child), pid)
    }

    #[test]
    fn terminates_a_long_sleep_within_grace() {
        let (child, pid) = spawn_sleep("30");
        let start = Instant::now();

        terminate(&child, pid, Duration::from_millis(500));

        // sleep exits on SIGTERM, so this should resolve well before the
        // forceful stage.
        assert!(start.elapsed() < Duration::from_secs(2));
        let status = lock(&child).try_wait().unwrap();
        assert!(status.is_some(), "child must be reaped");
    }

    #[test]
    fn already_exited_child_is_swallowed() {
        let (child, pid) = spawn_sleep("0");
        // Let it exit on its own first.
        lock(&child).wait().unwrap();

        terminate(&child, pid, Duration::from_millis(200));
    }

    #[cfg(unix)]
    #[test]
    fn escalates_to_forceful_when_graceful_is_ignored() {
        // A shell that traps SIGTERM and keeps sleeping only dies to SIGKILL.
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .stdin(Stdio::null())
            .spawn()
            .expect("sh must spawn");
        let pid = child.id();
        let child = Mutex::new(child);
        let start = Instant::now();

        terminate(&child, pid, Duration::from_millis(300));

        assert!(start.elapsed() < Duration::from_secs(2));
        let status = lock(&child).try_wait().unwrap();
        assert!(status.is_some(), "child must be dead after escalation");
    }
}
