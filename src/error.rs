use std::path::PathBuf;

/// Error taxonomy for a leash run.
///
/// `Validation` and `Spawn` are raised before or at process start and never
/// retried. `Timeout` is raised only on the blocking-with-timeout path and
/// only after the termination protocol (graceful signal, grace period,
/// forceful kill) has completed, so a caller observing it can rely on the
/// child being gone. `Stream` is a drainer-side I/O failure that is *not*
/// attributable to an in-flight timeout; while a timeout is being handled,
/// drainer errors are suppressed in favor of `Timeout`.
#[derive(Debug, thiserror::Error)]
pub enum LeashError {
    #[error("Cannot run '{program}': {violations}")]
    Validation { program: String, violations: String },

    #[error("Failed to spawn '{program}': {detail}")]
    Spawn { program: String, detail: String },

    #[error("'{program}' timed out after {timeout_sec}s")]
    Timeout { program: String, timeout_sec: i64 },

    #[error("Error draining {stream} of '{program}': {detail}")]
    Stream {
        program: String,
        stream: &'static str,
        detail: String,
    },

    #[error("Failed waiting for '{program}': {detail}")]
    Wait { program: String, detail: String },

    #[error("Failed to write captured {stream} to {path}: {detail}")]
    Flush {
        stream: &'static str,
        path: PathBuf,
        detail: String,
    },
}
