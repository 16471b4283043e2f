//! Verify runs that stop at each early stage
#![cfg(unix)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use rawparity_common::{FailureKind, HarnessConfig, SampleSource, Stage, SAMPLE_ALIAS};
use rawparity_harness::{Orchestrator, PipelineCall, ReferencePipeline, ReferenceRunner};
use tempfile::TempDir;

/// Reference backend that records its call and writes a placeholder output
#[derive(Default)]
struct RecordingPipeline {
    calls: Mutex<Vec<PipelineCall>>,
}

impl ReferencePipeline for RecordingPipeline {
    fn process_image(&self, call: &PipelineCall) -> anyhow::Result<()> {
        std::fs::write(&call.output_path, b"reference output")?;
        self.calls.lock().unwrap().push(call.clone());
        Ok(())
    }
}

fn config_in(dir: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.paths.parity_dir = dir.join("parity");
    config.sample.request_timeout_secs = 2;
    config.session.working_dir = dir.join("web");
    config.session.startup_timeout_secs = 1;
    config.session.poll_interval_ms = 50;
    config
}

fn provide_sample(config: &HarnessConfig) {
    std::fs::create_dir_all(&config.paths.parity_dir).unwrap();
    std::fs::write(config.paths.parity_dir.join(SAMPLE_ALIAS), b"raw bytes").unwrap();
}

/// No reachable sample source ends the run before any pipeline runs
#[tokio::test]
async fn unreachable_sample_stops_at_provisioning() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(tmp.path());
    config.sample.urls = vec![SampleSource::new("http://127.0.0.1:1/sample.dng", "sample.dng")];

    let pipeline = Arc::new(RecordingPipeline::default());
    let orchestrator = Orchestrator::new(config)
        .with_reference(Box::new(ReferenceRunner::new(pipeline.clone())));
    let failure = orchestrator.verify().await.unwrap_err();

    assert_eq!(failure.stage, Stage::ProvisioningSample);
    assert_eq!(failure.error.kind(), FailureKind::SampleUnavailable);
    assert_eq!(failure.exit_code(), 10);
    assert!(pipeline.calls.lock().unwrap().is_empty());
}

/// A reference pipeline that errors is reported before the session starts
#[tokio::test]
async fn reference_error_stops_at_running_reference() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(tmp.path());
    config.reference.program = "sh".to_string();
    config.reference.args = vec!["-c".to_string(), "echo unsupported camera >&2; exit 4".to_string()];
    config.reference.python_path = None;
    // Would fail the next stage if it were ever reached
    config.session.serve_command = vec!["/nonexistent/preview".to_string()];
    provide_sample(&config);

    let failure = Orchestrator::new(config).verify().await.unwrap_err();

    assert_eq!(failure.stage, Stage::RunningReference);
    assert_eq!(failure.error.kind(), FailureKind::ReferenceRunFailure);
    assert_eq!(failure.exit_code(), 11);
    assert!(failure.error.to_string().contains("unsupported camera"));
}

/// The reference runs with the fixed parity parameters, then the session fails
#[tokio::test]
async fn session_failure_stops_at_starting_session() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(tmp.path());
    config.session.serve_command = vec!["/nonexistent/preview".to_string()];
    std::fs::create_dir_all(config.session.working_dir.join("dist")).unwrap();
    provide_sample(&config);
    let reference_output = config.paths.reference_output_path();

    let pipeline = Arc::new(RecordingPipeline::default());
    let orchestrator = Orchestrator::new(config)
        .with_reference(Box::new(ReferenceRunner::new(pipeline.clone())));
    let failure = orchestrator.verify().await.unwrap_err();

    assert_eq!(failure.stage, Stage::StartingSession);
    assert_eq!(failure.error.kind(), FailureKind::SessionStartFailure);
    assert_eq!(failure.exit_code(), 12);
    assert_eq!(orchestrator.stage(), Stage::StartingSession);

    let calls = pipeline.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].exposure, 0.0);
    assert_eq!(calls[0].log_space, "Arri LogC3");
    assert!(!calls[0].lens_correct);
    assert!(reference_output.is_file());
}
