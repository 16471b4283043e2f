//! Single-pipeline commands: run-reference and run-candidate

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use rawparity_common::RunResult;
use rawparity_harness::Orchestrator;
use serde::Serialize;

use crate::output::{print_item, print_success, OutputFormat, TableDisplay};

/// Input and output of one pipeline run
#[derive(Args)]
pub struct RunArgs {
    /// RAW file to process
    #[arg(short, long)]
    pub input: PathBuf,

    /// Where the 16-bit TIFF is written
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Run result display wrapper
#[derive(Serialize)]
pub struct RunDisplay {
    pub runner: &'static str,
    pub artifact: PathBuf,
    pub success: bool,
    pub console_messages: usize,
}

impl RunDisplay {
    fn new(runner: &'static str, result: &RunResult) -> Self {
        Self {
            runner,
            artifact: result.artifact_path.clone(),
            success: result.success,
            console_messages: result.console.len(),
        }
    }
}

impl TableDisplay for RunDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Runner", "Artifact", "Success", "Console"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.runner.to_string(),
            self.artifact.display().to_string(),
            if self.success { "✓" } else { "✗" }.to_string(),
            self.console_messages.to_string(),
        ]
    }
}

pub async fn execute_reference(args: RunArgs, orchestrator: &Orchestrator, format: OutputFormat) -> Result<()> {
    let result = orchestrator.run_reference(&args.input, &args.output).await?;
    print_success(&format!("Reference output written to {}", args.output.display()));
    print_item(&RunDisplay::new("reference", &result), format);
    Ok(())
}

pub async fn execute_candidate(args: RunArgs, orchestrator: &Orchestrator, format: OutputFormat) -> Result<()> {
    let result = orchestrator.run_candidate(&args.input, &args.output).await?;
    print_success(&format!("Candidate output written to {}", args.output.display()));
    print_item(&RunDisplay::new("candidate", &result), format);
    Ok(())
}
