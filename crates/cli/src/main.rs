//! RawParity CLI - Main Entry Point
//!
//! Runs the reference and candidate RAW pipelines on the same sample and
//! reports how far apart their outputs are.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rawparity_common::{HarnessConfig, DEFAULT_CONFIG_FILE};
use rawparity_harness::{Orchestrator, StageFailure};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{compare, init, run, verify};
use output::{print_error, print_info, print_warning};

/// Exit code for configuration and usage errors
const EXIT_USAGE: u8 = 2;

/// RawParity - differential parity checks for RAW pipelines
#[derive(Parser)]
#[command(name = "rawparity")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file
    #[arg(long, env = "RAWPARITY_CONFIG", default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reference pipeline on one input
    RunReference(run::RunArgs),

    /// Run the browser-hosted pipeline on one input
    RunCandidate(run::RunArgs),

    /// Compare two existing outputs
    Compare(compare::CompareArgs),

    /// Provision, run both pipelines, compare and report
    Verify(verify::VerifyArgs),

    /// Write the default configuration file
    InitConfig(init::InitConfigArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let logger = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        logger.json().init();
    } else {
        logger.init();
    }

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(report_failure(&e)),
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let config = cli.config;

    match cli.command {
        Commands::RunReference(args) => run::execute_reference(args, &load(&config)?, format).await,
        Commands::RunCandidate(args) => run::execute_candidate(args, &load(&config)?, format).await,
        Commands::Compare(args) => compare::execute(args, load(&config)?, format),
        Commands::Verify(args) => verify::execute(args, load(&config)?, format).await,
        Commands::InitConfig(args) => init::execute(args, &config),
    }
}

fn load(path: &Path) -> anyhow::Result<Orchestrator> {
    let config = HarnessConfig::load(path)?;
    Ok(Orchestrator::new(config))
}

/// Print what went wrong and pick the process exit code
fn report_failure(err: &anyhow::Error) -> u8 {
    let Some(failure) = err.downcast_ref::<StageFailure>() else {
        print_error(&format!("{:#}", err));
        return EXIT_USAGE;
    };

    print_error(&failure.to_string());
    for line in &failure.console {
        print_warning(line);
    }
    if let Some(path) = &failure.diagnostic {
        print_info(&format!("Diagnostic saved to {}", path.display()));
    }

    u8::try_from(failure.exit_code()).unwrap_or(1)
}
