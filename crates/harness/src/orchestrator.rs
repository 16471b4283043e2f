//! Orchestrator - the verify state machine
//!
//! ```text
//! ProvisioningSample → RunningReference → StartingSession → RunningCandidate
//!     → Aligning → Scoring → Reporting → Done
//! ```
//!
//! The first failing stage ends the run with a [`StageFailure`]. A started
//! session is stopped before leaving `RunningCandidate` on every path,
//! including failures and Ctrl-C.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rawparity_common::config::ReportConfig;
use rawparity_common::{HarnessConfig, MetricReport, PipelineConfig, RunResult, Stage};
use serde::Serialize;
use tracing::{error, info};

use crate::align::align;
use crate::driver::{CandidateRunner, UiDriver};
use crate::error::{HarnessError, StageFailure};
use crate::imaging::ImageBuffer;
use crate::metrics::score;
use crate::reference::ReferenceRunner;
use crate::report::{emit, file_sha256, EmittedReport};
use crate::runner::PipelineRunner;
use crate::sample::SampleProvisioner;
use crate::session::{SessionManager, SESSION_LOG};

/// Output of the comparison stages
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub report: MetricReport,
    pub files: EmittedReport,
}

/// Everything a successful verify run produced
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub sample: PathBuf,
    pub reference: RunResult,
    pub candidate: RunResult,
    pub comparison: Comparison,
}

/// Sequences the whole parity run
pub struct Orchestrator {
    config: HarnessConfig,
    output_dir: PathBuf,
    reference: Box<dyn PipelineRunner>,
    stage: Mutex<Stage>,
}

impl Orchestrator {
    /// Orchestrator writing its report into the configured parity directory
    pub fn new(config: HarnessConfig) -> Self {
        let output_dir = config.paths.parity_dir.clone();
        let reference = Box::new(ReferenceRunner::from_config(&config.reference));
        Self {
            config,
            output_dir,
            reference,
            stage: Mutex::new(Stage::ProvisioningSample),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Swap the reference backend
    pub fn with_reference(mut self, runner: Box<dyn PipelineRunner>) -> Self {
        self.reference = runner;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Stage currently executing (or the last one executed)
    pub fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn enter(&self, stage: Stage) {
        info!(%stage, "Entering stage");
        *self.stage.lock().unwrap_or_else(|p| p.into_inner()) = stage;
    }

    /// Run every stage. Ctrl-C aborts with `Interrupted` after teardown.
    pub async fn verify(&self) -> Result<VerifyOutcome, StageFailure> {
        self.interruptible(self.run_stages()).await
    }

    async fn run_stages(&self) -> Result<VerifyOutcome, StageFailure> {
        let pipeline = PipelineConfig::parity_defaults();
        let paths = &self.config.paths;

        self.enter(Stage::ProvisioningSample);
        let sample = self
            .provision()
            .await
            .map_err(|e| StageFailure::new(Stage::ProvisioningSample, e))?;

        self.enter(Stage::RunningReference);
        let reference_output = paths.reference_output_path();
        let reference = self.reference.run(&sample, &reference_output, &pipeline).await;
        check(Stage::RunningReference, &reference)?;

        let candidate = self
            .candidate_stages(&sample, &paths.candidate_output_path(), &pipeline)
            .await?;

        let comparison = self.compare_stages(&reference_output, candidate.artifact_path())?;

        self.enter(Stage::Done);
        Ok(VerifyOutcome {
            sample,
            reference,
            candidate,
            comparison,
        })
    }

    /// Run only the reference side
    pub async fn run_reference(&self, input: &Path, output: &Path) -> Result<RunResult, StageFailure> {
        self.enter(Stage::RunningReference);
        let run = async {
            let result = self
                .reference
                .run(input, output, &PipelineConfig::parity_defaults())
                .await;
            check(Stage::RunningReference, &result)?;
            Ok(result)
        };
        self.interruptible(run).await
    }

    /// Run only the candidate side, including session start and stop
    pub async fn run_candidate(&self, input: &Path, output: &Path) -> Result<RunResult, StageFailure> {
        let pipeline = PipelineConfig::parity_defaults();
        self.interruptible(self.candidate_stages(input, output, &pipeline))
            .await
    }

    /// Compare two existing outputs and write the report
    pub fn compare(&self, reference: &Path, candidate: &Path) -> Result<Comparison, StageFailure> {
        self.compare_stages(reference, candidate)
    }

    async fn provision(&self) -> Result<PathBuf, HarnessError> {
        let alias = self.config.paths.sample_path();
        if alias.exists() {
            info!(sample = %alias.display(), "Sample already provisioned");
            return Ok(alias);
        }

        SampleProvisioner::new(&self.config.sample, &self.config.paths.parity_dir)?
            .ensure_sample(&self.config.sample.urls)
            .await
    }

    async fn candidate_stages(
        &self,
        input: &Path,
        output: &Path,
        pipeline: &PipelineConfig,
    ) -> Result<RunResult, StageFailure> {
        self.enter(Stage::StartingSession);
        let manager = SessionManager::new(self.config.session.clone()).with_log_dir(&self.output_dir);
        let mut session = manager.start_session().await.map_err(|e| {
            let log = self.output_dir.join(SESSION_LOG);
            StageFailure::new(Stage::StartingSession, e).with_diagnostic(log.exists().then_some(log))
        })?;

        self.enter(Stage::RunningCandidate);
        let result = match UiDriver::new(self.config.driver.clone(), &self.config.session.working_dir).await {
            Ok(driver) => {
                CandidateRunner::new(&driver, &session)
                    .run(input, output, pipeline)
                    .await
            }
            Err(e) => RunResult::failed(output, e.to_diagnostic(None)),
        };

        // The session never outlives the candidate stage
        manager.stop_session(&mut session).await;
        drop(session);

        check(Stage::RunningCandidate, &result)?;
        Ok(result)
    }

    fn compare_stages(&self, reference: &Path, candidate: &Path) -> Result<Comparison, StageFailure> {
        compare(reference, candidate, &self.output_dir, &self.config.report, |stage| {
            self.enter(stage)
        })
    }

    async fn interruptible<T, F>(&self, run: F) -> Result<T, StageFailure>
    where
        F: Future<Output = Result<T, StageFailure>>,
    {
        tokio::select! {
            result = run => result,
            _ = tokio::signal::ctrl_c() => {
                // `run` is dropped here, which stops any live session
                let stage = self.stage();
                error!(%stage, "Interrupted");
                Err(StageFailure::new(stage, HarnessError::Interrupted))
            }
        }
    }
}

/// Align, score and report two output files.
///
/// `on_stage` is told about each stage as it starts.
pub fn compare(
    reference: &Path,
    candidate: &Path,
    output_dir: &Path,
    config: &ReportConfig,
    mut on_stage: impl FnMut(Stage),
) -> Result<Comparison, StageFailure> {
    on_stage(Stage::Aligning);
    let fail = |stage: Stage| move |e: HarnessError| StageFailure::new(stage, e);

    let a = ImageBuffer::open(reference).map_err(fail(Stage::Aligning))?;
    let b = ImageBuffer::open(candidate).map_err(fail(Stage::Aligning))?;
    let (a, b) = align(a, b).map_err(fail(Stage::Aligning))?;

    on_stage(Stage::Scoring);
    let mut report = score(&a, &b).map_err(fail(Stage::Scoring))?;
    report.reference_name = file_name(reference);
    report.candidate_name = file_name(candidate);
    report.reference_sha256 = Some(file_sha256(reference).map_err(fail(Stage::Scoring))?);
    report.candidate_sha256 = Some(file_sha256(candidate).map_err(fail(Stage::Scoring))?);

    on_stage(Stage::Reporting);
    let files = emit(&report, (&a, &b), output_dir, config).map_err(fail(Stage::Reporting))?;
    info!(
        psnr_db = report.psnr_db,
        ssim = report.ssim_score,
        report = %files.markdown.display(),
        "Comparison complete"
    );

    Ok(Comparison { report, files })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Turn a failed RunResult into the stage's tagged failure
fn check(stage: Stage, result: &RunResult) -> Result<(), StageFailure> {
    if result.success {
        return Ok(());
    }

    let failure = match &result.error {
        Some(diagnostic) => StageFailure::new(stage, HarnessError::from_diagnostic(diagnostic))
            .with_diagnostic(diagnostic.screenshot.clone()),
        None => StageFailure::new(
            stage,
            HarnessError::Driver(format!("{} run failed without a diagnostic", stage)),
        ),
    };
    Err(failure.with_console(result.console.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rawparity_common::{FailureKind, RunDiagnostic};

    #[test]
    fn test_check_carries_diagnostic() {
        let result = RunResult::failed(
            "out.tiff",
            RunDiagnostic {
                kind: FailureKind::RenderTimeout,
                message: "canvas never appeared".into(),
                screenshot: Some(PathBuf::from("candidate_error.png")),
            },
        )
        .with_console(vec!["PAGE ERROR: boom".into()]);

        let failure = check(Stage::RunningCandidate, &result).unwrap_err();
        assert_eq!(failure.error.kind(), FailureKind::RenderTimeout);
        assert_eq!(failure.diagnostic, Some(PathBuf::from("candidate_error.png")));
        assert_eq!(failure.console, vec!["PAGE ERROR: boom"]);
        assert_eq!(failure.exit_code(), 13);
    }

    #[test]
    fn test_compare_reports_stage_of_decode_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bad = tmp.path().join("bad.tiff");
        std::fs::write(&bad, b"nope").unwrap();

        let mut seen = Vec::new();
        let failure = compare(&bad, &bad, tmp.path(), &ReportConfig::default(), |s| seen.push(s))
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Aligning);
        assert_eq!(failure.error.kind(), FailureKind::AlignmentImpossible);
        assert_eq!(seen, vec![Stage::Aligning]);
    }
}
