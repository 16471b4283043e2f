//! Init-Config Command

use std::path::Path;

use anyhow::{bail, Result};
use clap::Args;
use rawparity_common::HarnessConfig;

use crate::output::print_success;

#[derive(Args)]
pub struct InitConfigArgs {
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

pub fn execute(args: InitConfigArgs, path: &Path) -> Result<()> {
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    HarnessConfig::default().save(path)?;
    print_success(&format!("Wrote default configuration to {}", path.display()));
    Ok(())
}
