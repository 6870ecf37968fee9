use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// leash — run a command on a leash.
///
/// Launches a program with stdout/stderr captured and, when a timeout is
/// set, terminates it (SIGTERM, then SIGKILL after a grace period) once
/// the budget is exceeded.
#[derive(Debug, Parser)]
#[command(name = "leash", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a program, capture its output, and kill it if it overruns.
    Run(RunArgs),
}

/// Arguments for the `run` subcommand.
///
/// Option values can also come from a TOML config file (`--config`) or
/// `LEASH_*` env vars. Precedence: CLI > env > file > defaults.
#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    /// The program to run and its arguments, e.g. `leash run -- make -j4`.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,

    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Timeout in whole seconds; zero or negative disables the timeout.
    #[arg(long)]
    pub timeout_sec: Option<i64>,

    /// Grace period in milliseconds between the graceful signal and the
    /// forceful kill (default: 500).
    #[arg(long)]
    pub kill_grace_ms: Option<u64>,

    /// Skip path validation; only a non-empty program name is required.
    #[arg(long, default_value_t = false)]
    pub no_injection_check: bool,

    /// Declare that the program path came from untrusted external input.
    /// Rejected unless --no-injection-check is also given.
    #[arg(long, default_value_t = false)]
    pub untrusted: bool,

    /// Write the captured stdout buffer to this file after the run.
    #[arg(long)]
    pub stdout_file: Option<PathBuf>,

    /// Write the captured stderr buffer to this file after the run.
    #[arg(long)]
    pub stderr_file: Option<PathBuf>,

    /// Truncate the stdout file instead of appending.
    #[arg(long, default_value_t = false)]
    pub overwrite_stdout: bool,

    /// Truncate the stderr file instead of appending.
    #[arg(long, default_value_t = false)]
    pub overwrite_stderr: bool,

    /// Log level or directive (e.g. "debug", "leash=trace,warn").
    #[arg(long)]
    pub log_level: Option<String>,

    /// Also write JSON logs to this file (appending).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
