//! Captured output of a finished run, plus flush-to-file glue.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::config::RunConfig;
use crate::error::LeashError;

/// Output of a run that was waited on: exit status plus the fully drained
/// stdout/stderr buffers. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// `None` when the OS did not report an exit code (signal termination
    /// on Unix).
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunOutput {
    /// Returns `true` when the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Lossy UTF-8 view of stdout.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Lossy UTF-8 view of stderr.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Write the captured stdout buffer to `path`, appending or truncating.
    ///
    /// Overwrite mode is idempotent: flushing twice leaves exactly one copy
    /// of the buffer in the file.
    pub fn flush_stdout(&self, path: &Path, append: bool) -> Result<(), LeashError> {
        write_buffer(&self.stdout, path, append, "stdout")
    }

    /// Write the captured stderr buffer to `path`, appending or truncating.
    pub fn flush_stderr(&self, path: &Path, append: bool) -> Result<(), LeashError> {
        write_buffer(&self.stderr, path, append, "stderr")
    }

    /// Flush both streams to the destinations named in `config`, if any.
    /// The two streams are independent; each is written only when its path
    /// is configured.
    pub fn flush_configured(&self, config: &RunConfig) -> Result<(), LeashError> {
        if let Some(path) = &config.stdout_file {
            self.flush_stdout(path, config.stdout_append)?;
        }
        if let Some(path) = &config.stderr_file {
            self.flush_stderr(path, config.stderr_append)?;
        }
        Ok(())
    }
}

fn write_buffer(
    buffer: &[u8],
    path: &Path,
    append: bool,
    stream: &'static str,
) -> Result<(), LeashError> {
    let flush_err = |detail: String| LeashError::Flush {
        stream,
        path: path.to_path_buf(),
        detail,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(append)
        .write(true)
        .truncate(!append)
        .open(path)
        .map_err(|e| flush_err(e.to_string()))?;

    file.write_all(buffer).map_err(|e| flush_err(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stdout: &str, stderr: &str) -> RunOutput {
        RunOutput {
            exit_code: Some(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn success_requires_exit_zero() {
        assert!(output("", "").success());

        let failed = RunOutput {
            exit_code: Some(1),
            ..output("", "")
        };
        assert!(!failed.success());

        let signaled = RunOutput {
            exit_code: None,
            ..output("", "")
        };
        assert!(!signaled.success());
    }

    #[test]
    fn overwrite_flush_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let out = output("captured\n", "");

        out.flush_stdout(&path, false).unwrap();
        out.flush_stdout(&path, false).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "captured\n");
    }

    #[test]
    fn append_flush_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let out = output("line\n", "");

        out.flush_stdout(&path, true).unwrap();
        out.flush_stdout(&path, true).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\nline\n");
    }

    #[test]
    fn streams_flush_independently() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.log");
        let err_path = dir.path().join("err.log");
        let out = output("to stdout\n", "to stderr\n");

        let config = crate::config::RunConfig::new("echo")
            .stdout_file(&out_path, false)
            .stderr_file(&err_path, false);
        out.flush_configured(&config).unwrap();

        assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "to stdout\n");
        assert_eq!(std::fs::read_to_string(&err_path).unwrap(), "to stderr\n");
    }

    #[test]
    fn no_configured_paths_writes_nothing() {
        let out = output("x", "y");
        let config = crate::config::RunConfig::new("echo");
        out.flush_configured(&config).unwrap();
    }

    #[test]
    fn flush_to_bad_path_surfaces_flush_error() {
        let out = output("x", "");
        let err = out
            .flush_stdout(Path::new("/no/such/dir/out.log"), false)
            .unwrap_err();
        assert!(matches!(err, LeashError::Flush { stream: "stdout", .. }));
    }

    #[test]
    fn lossy_views_round_trip_ascii() {
        let out = output("hello", "oops");
        assert_eq!(out.stdout_str(), "hello");
        assert_eq!(out.stderr_str(), "oops");
    }
}
