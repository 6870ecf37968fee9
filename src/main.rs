use std::io::Write;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info};

use leash::cli::{Cli, Commands};
use leash::config::CliConfig;
use leash::process::Execution;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Run(args) => {
            let config_path = args.config.clone();
            let config = CliConfig::load(config_path.as_deref(), &args)?;

            leash::logging::init(config.log_level.as_deref(), config.log_file.as_deref())?;

            let run = config.run;
            info!(
                program = %run.program,
                timeout_sec = run.timeout_sec,
                kill_grace_ms = run.kill_grace_ms,
                "starting run"
            );

            let start = Instant::now();
            let Execution::Finished(output) = leash::execute(&run)? else {
                anyhow::bail!("blocking CLI run returned a detached handle");
            };

            info!(
                exit_code = output.exit_code,
                duration_ms = start.elapsed().as_millis() as u64,
                stdout_len = output.stdout.len(),
                stderr_len = output.stderr.len(),
                "run finished"
            );

            output.flush_configured(&run)?;

            // Mirror the child's streams and exit code.
            std::io::stdout().write_all(&output.stdout)?;
            std::io::stderr().write_all(&output.stderr)?;

            let code = output.exit_code.unwrap_or(1);
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
    }
}
