//! The pipeline runner abstraction shared by both backends

use std::path::Path;

use async_trait::async_trait;
use rawparity_common::{PipelineConfig, RunResult};

/// One way of turning an input file plus a parameter set into an output image.
///
/// Implementations never return errors: every failure is folded into a
/// `RunResult` with `success == false` and a tagged diagnostic, so the
/// orchestrator treats both backends identically.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &'static str;

    /// Run the pipeline. Writes at most one file, at `output`.
    async fn run(&self, input: &Path, output: &Path, config: &PipelineConfig) -> RunResult;
}

#[async_trait]
impl<T: PipelineRunner + ?Sized> PipelineRunner for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn run(&self, input: &Path, output: &Path, config: &PipelineConfig) -> RunResult {
        (**self).run(input, output, config).await
    }
}

/// Remove a stale artifact so a failed run can never be mistaken for a
/// successful one
pub(crate) async fn clear_output(output: &Path) -> std::io::Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    match tokio::fs::remove_file(output).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
