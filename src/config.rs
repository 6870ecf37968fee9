use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cli::RunArgs;

const ENV_PREFIX: &str = "LEASH_";

/// Default grace period between the graceful signal and the forceful kill.
pub const DEFAULT_KILL_GRACE_MS: u64 = 500;

/// Options for a single run. Immutable after construction.
///
/// Built with [`RunConfig::new`] plus the builder setters; every field has
/// a default so `RunConfig::new("prog")` alone is a valid configuration
/// (no timeout, injection check on, no output files, non-blocking).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Executable name or path. Resolved by the OS via `PATH` when bare.
    pub program: String,
    pub args: Vec<String>,
    /// Timeout in whole seconds; zero or negative disables the watchdog.
    pub timeout_sec: i64,
    /// When true (default), validation checks existence, executability and
    /// rejects embedded spaces and untrusted provenance. When false, only
    /// a non-empty program name is required.
    pub injection_check: bool,
    /// Caller-declared flag: the program path came from untrusted external
    /// input. Rejected by validation while the injection check is on.
    pub untrusted_input: bool,
    pub stdout_file: Option<PathBuf>,
    /// Append (true, default) vs truncate-then-write for `stdout_file`.
    pub stdout_append: bool,
    pub stderr_file: Option<PathBuf>,
    pub stderr_append: bool,
    /// Wait for completion (true) vs return a handle immediately.
    pub wait: bool,
    /// Exec-and-never-return mode. Present for interface completeness;
    /// always rejected by validation.
    pub replace_process: bool,
    /// How long to wait after the graceful signal before the forceful kill.
    pub kill_grace_ms: u64,
}

impl RunConfig {
    pub fn new(program: impl Into<String>) -> Self {
        RunConfig {
            program: program.into(),
            args: Vec::new(),
            timeout_sec: 0,
            injection_check: true,
            untrusted_input: false,
            stdout_file: None,
            stdout_append: true,
            stderr_file: None,
            stderr_append: true,
            wait: false,
            replace_process: false,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout_sec(mut self, timeout_sec: i64) -> Self {
        self.timeout_sec = timeout_sec;
        self
    }

    pub fn injection_check(mut self, enabled: bool) -> Self {
        self.injection_check = enabled;
        self
    }

    pub fn untrusted_input(mut self, untrusted: bool) -> Self {
        self.untrusted_input = untrusted;
        self
    }

    pub fn stdout_file(mut self, path: impl Into<PathBuf>, append: bool) -> Self {
        self.stdout_file = Some(path.into());
        self.stdout_append = append;
        self
    }

    pub fn stderr_file(mut self, path: impl Into<PathBuf>, append: bool) -> Self {
        self.stderr_file = Some(path.into());
        self.stderr_append = append;
        self
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn kill_grace_ms(mut self, ms: u64) -> Self {
        self.kill_grace_ms = ms;
        self
    }

    /// True when a watchdog should run for this configuration.
    pub fn has_timeout(&self) -> bool {
        self.timeout_sec > 0
    }
}

/// Configuration resolved for the `leash` binary: the run options plus
/// logging settings that do not belong on the library surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub run: RunConfig,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

/// TOML-deserializable config file representation. All fields optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    timeout_sec: Option<i64>,
    kill_grace_ms: Option<u64>,
    injection_check: Option<bool>,
    stdout_file: Option<PathBuf>,
    stderr_file: Option<PathBuf>,
    stdout_append: Option<bool>,
    stderr_append: Option<bool>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

/// Intermediate layer where every field is optional, used to merge sources.
#[derive(Debug, Default)]
struct ConfigLayer {
    timeout_sec: Option<i64>,
    kill_grace_ms: Option<u64>,
    injection_check: Option<bool>,
    stdout_file: Option<PathBuf>,
    stderr_file: Option<PathBuf>,
    stdout_append: Option<bool>,
    stderr_append: Option<bool>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

impl CliConfig {
    /// Load configuration with precedence: CLI > env > file > defaults.
    pub fn load(config_path: Option<&Path>, cli_args: &RunArgs) -> anyhow::Result<Self> {
        Self::load_with_env(config_path, cli_args, real_env_var)
    }

    /// Internal constructor that accepts an env-var lookup function,
    /// enabling deterministic testing without process-global mutation.
    fn load_with_env(
        config_path: Option<&Path>,
        cli_args: &RunArgs,
        env_fn: fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let file_layer = match config_path {
            Some(path) => load_file_layer(path)?,
            None => ConfigLayer::default(),
        };
        let env_layer = load_env_layer(env_fn)?;
        let cli_layer = cli_layer_from(cli_args);

        let merged = merge_layers(file_layer, env_layer, cli_layer);

        let mut command = cli_args.command.iter();
        let program = command
            .next()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no program given (usage: leash run -- PROG [ARGS]...)"))?;

        let mut run = RunConfig::new(program).args(command.cloned()).wait(true);
        if let Some(t) = merged.timeout_sec {
            run.timeout_sec = t;
        }
        if let Some(ms) = merged.kill_grace_ms {
            run.kill_grace_ms = ms;
        }
        if let Some(check) = merged.injection_check {
            run.injection_check = check;
        }
        run.untrusted_input = cli_args.untrusted;
        run.stdout_file = merged.stdout_file;
        run.stderr_file = merged.stderr_file;
        run.stdout_append = merged.stdout_append.unwrap_or(true);
        run.stderr_append = merged.stderr_append.unwrap_or(true);

        Ok(CliConfig {
            run,
            log_level: merged.log_level,
            log_file: merged.log_file,
        })
    }
}

fn load_file_layer(path: &Path) -> anyhow::Result<ConfigLayer> {
    let contents = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
    let fc: FileConfig = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(ConfigLayer {
        timeout_sec: fc.timeout_sec,
        kill_grace_ms: fc.kill_grace_ms,
        injection_check: fc.injection_check,
        stdout_file: fc.stdout_file,
        stderr_file: fc.stderr_file,
        stdout_append: fc.stdout_append,
        stderr_append: fc.stderr_append,
        log_level: fc.log_level,
        log_file: fc.log_file,
    })
}

fn real_env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn load_env_layer(env_fn: fn(&str) -> Option<String>) -> anyhow::Result<ConfigLayer> {
    let get = |suffix: &str| env_fn(&format!("{ENV_PREFIX}{suffix}"));

    let parse_i64 = |suffix: &str| -> anyhow::Result<Option<i64>> {
        match get(suffix) {
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("failed to parse {ENV_PREFIX}{suffix}: {e}")),
            None => Ok(None),
        }
    };
    let parse_u64 = |suffix: &str| -> anyhow::Result<Option<u64>> {
        match get(suffix) {
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("failed to parse {ENV_PREFIX}{suffix}: {e}")),
            None => Ok(None),
        }
    };
    let parse_bool = |suffix: &str| -> anyhow::Result<Option<bool>> {
        match get(suffix) {
            Some(raw) => match raw.as_str() {
                "true" | "1" => Ok(Some(true)),
                "false" | "0" => Ok(Some(false)),
                other => Err(anyhow::anyhow!(
                    "failed to parse {ENV_PREFIX}{suffix}: expected true/false, got '{other}'"
                )),
            },
            None => Ok(None),
        }
    };

    Ok(ConfigLayer {
        timeout_sec: parse_i64("TIMEOUT_SEC")?,
        kill_grace_ms: parse_u64("KILL_GRACE_MS")?,
        injection_check: parse_bool("INJECTION_CHECK")?,
        stdout_file: get("STDOUT_FILE").map(PathBuf::from),
        stderr_file: get("STDERR_FILE").map(PathBuf::from),
        stdout_append: parse_bool("STDOUT_APPEND")?,
        stderr_append: parse_bool("STDERR_APPEND")?,
        log_level: get("LOG_LEVEL"),
        log_file: get("LOG_FILE").map(PathBuf::from),
    })
}

fn cli_layer_from(args: &RunArgs) -> ConfigLayer {
    ConfigLayer {
        timeout_sec: args.timeout_sec,
        kill_grace_ms: args.kill_grace_ms,
        injection_check: if args.no_injection_check {
            Some(false)
        } else {
            None
        },
        stdout_file: args.stdout_file.clone(),
        stderr_file: args.stderr_file.clone(),
        stdout_append: if args.overwrite_stdout { Some(false) } else { None },
        stderr_append: if args.overwrite_stderr { Some(false) } else { None },
        log_level: args.log_level.clone(),
        log_file: args.log_file.clone(),
    }
}

/// Merge three layers with precedence `cli` > `env` > `file`.
fn merge_layers(file: ConfigLayer, env: ConfigLayer, cli: ConfigLayer) -> ConfigLayer {
    ConfigLayer {
        timeout_sec: cli.timeout_sec.or(env.timeout_sec).or(file.timeout_sec),
        kill_grace_ms: cli
            .kill_grace_ms
            .or(env.kill_grace_ms)
            .or(file.kill_grace_ms),
        injection_check: cli
            .injection_check
            .or(env.injection_check)
            .or(file.injection_check),
        stdout_file: cli.stdout_file.or(env.stdout_file).or(file.stdout_file),
        stderr_file: cli.stderr_file.or(env.stderr_file).or(file.stderr_file),
        stdout_append: cli
            .stdout_append
            .or(env.stdout_append)
            .or(file.stdout_append),
        stderr_append: cli
            .stderr_append
            .or(env.stderr_append)
            .or(file.stderr_append),
        log_level: cli.log_level.or(env.log_level).or(file.log_level),
        log_file: cli.log_file.or(env.log_file).or(file.log_file),
    }
}
