//! OpsFlow command-line interface

use std::process;

mod cli;
mod exit_codes;
mod run;
mod validate;

use cli::{Cli, Commands};
use exit_codes::EXIT_ERROR;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("OPSFLOW_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run {
            file,
            env,
            auto_approve,
            triggered_by,
        } => run::run_workflow_command(&file, env, auto_approve, triggered_by).await,
        Commands::Validate { file } => validate::validate_command(&file),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            EXIT_ERROR
        }
    };
    process::exit(exit_code);
}
