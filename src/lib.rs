//! Run external executables with captured output and a bounded execution
//! time.
//!
//! The core is a process lifecycle manager: the spawned child, two drainer
//! threads copying its stdout/stderr pipes into buffers, and an optional
//! watchdog thread that declares a timeout, all agreeing on the outcome
//! through one lock-guarded completion record. A declared timeout triggers
//! a two-stage termination protocol (graceful signal, grace period,
//! forceful kill) before the error is surfaced.
//!
//! ```no_run
//! use leash::{run_blocking, run_with_timeout};
//!
//! let out = run_blocking("echo", ["hello"])?;
//! assert!(out.success());
//! assert_eq!(out.stdout, b"hello\n");
//!
//! // Fails with LeashError::Timeout, with the child already dead.
//! let _err = run_with_timeout("sleep", ["30"], 1).unwrap_err();
//! # Ok::<(), leash::LeashError>(())
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod process;
pub mod terminate;
pub mod validate;

pub use config::RunConfig;
pub use error::LeashError;
pub use output::RunOutput;
pub use process::{Execution, ExecutionHandle, RunStatus, execute, spawn_run};
pub use terminate::TermSignal;

/// Run `program` synchronously with no timeout, returning its exit status
/// and fully drained output.
pub fn run_blocking<I, S>(program: &str, args: I) -> Result<RunOutput, LeashError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    spawn_run(&RunConfig::new(program).args(args))?.join()
}

/// As [`run_blocking`], but fail with [`LeashError::Timeout`] when the
/// process outlives `timeout_sec` seconds. The child is terminated
/// (gracefully, then forcibly) before the error is returned.
pub fn run_with_timeout<I, S>(
    program: &str,
    args: I,
    timeout_sec: i64,
) -> Result<RunOutput, LeashError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    spawn_run(&RunConfig::new(program).args(args).timeout_sec(timeout_sec))?.join()
}

/// Spawn `program` and return immediately with a handle the caller may
/// poll, join, or drop (dropping detaches the run).
pub fn spawn<I, S>(program: &str, args: I) -> Result<ExecutionHandle, LeashError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    spawn_run(&RunConfig::new(program).args(args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_blocking_captures_hello() {
        let out = run_blocking("echo", ["hello"]).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_str(), "hello\n");
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn run_with_timeout_passes_fast_commands_through() {
        let out = run_with_timeout("echo", ["quick"], 5).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, b"quick\n");
    }

    #[test]
    fn run_with_timeout_kills_sleep() {
        let start = std::time::Instant::now();
        let err = run_with_timeout("sleep", ["5"], 1).unwrap_err();
        assert!(matches!(err, LeashError::Timeout { timeout_sec: 1, .. }));
        assert!(start.elapsed() < std::time::Duration::from_millis(2500));
    }

    #[test]
    fn spawn_returns_a_live_handle() {
        let handle = spawn("sleep", ["0"]).unwrap();
        assert!(handle.pid() > 0);
        let out = handle.join().unwrap();
        assert!(out.success());
    }
}
