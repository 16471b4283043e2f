//! Verify Command - the full parity run

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use rawparity_harness::Orchestrator;

use crate::commands::compare::print_comparison;
use crate::output::{print_structured, print_success, print_warning, OutputFormat};

#[derive(Args)]
pub struct VerifyArgs {
    /// Directory receiving the report (defaults to the configured parity dir)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

pub async fn execute(args: VerifyArgs, orchestrator: Orchestrator, format: OutputFormat) -> Result<()> {
    let orchestrator = match args.output_dir {
        Some(dir) => orchestrator.with_output_dir(dir),
        None => orchestrator,
    };

    let outcome = orchestrator.verify().await?;

    if format.is_structured() {
        print_structured(&outcome, format);
        return Ok(());
    }

    for line in &outcome.candidate.console {
        print_warning(line);
    }
    print_success(&format!(
        "Both pipelines processed {}",
        outcome.sample.display()
    ));
    print_comparison(&outcome.comparison, format);
    Ok(())
}
