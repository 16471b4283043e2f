//! Reference runner - direct invocation of the ground-truth pipeline
//!
//! The reference pipeline is an external collaborator reached through the
//! [`ReferencePipeline`] trait. The default implementation shells out to the
//! Python package through a tiny bridge that forwards every field of the call
//! explicitly.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use rawparity_common::config::ReferenceConfig;
use rawparity_common::{PipelineConfig, RunResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::HarnessError;
use crate::runner::{clear_output, PipelineRunner};

/// Bridge executed by the reference interpreter.
///
/// The reference library hardcodes the tone parameters, so the bridge refuses
/// any call that asks for different values instead of ignoring them.
pub const PYTHON_BRIDGE: &str = r#"
import json, sys
call = json.loads(sys.argv[-1])
FIXED = {"red_gain": 1.0, "green_gain": 1.0, "blue_gain": 1.0,
         "saturation": 1.25, "contrast": 1.1, "input_linearization": 1.0}
for key, fixed in FIXED.items():
    if abs(call[key] - fixed) > 1e-9:
        sys.exit("reference pipeline cannot force %s=%r (fixed at %r)" % (key, call[key], fixed))
from raw_alchemy import core
core.process_image(
    raw_path=call["raw_path"],
    output_path=call["output_path"],
    log_space=call["log_space"],
    lut_path=call["lut_path"],
    exposure=call["exposure"],
    lens_correct=call["lens_correct"],
    metering_mode=call["metering_mode"],
)
"#;

/// Every argument handed to the reference pipeline, nothing defaulted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCall {
    pub raw_path: PathBuf,
    pub output_path: PathBuf,
    pub log_space: String,
    pub lut_path: Option<PathBuf>,
    pub exposure: f64,
    pub lens_correct: bool,
    pub metering_mode: String,
    pub red_gain: f64,
    pub green_gain: f64,
    pub blue_gain: f64,
    pub saturation: f64,
    pub contrast: f64,
    pub input_linearization: f64,
}

impl PipelineCall {
    pub fn new(input: &Path, output: &Path, config: &PipelineConfig) -> Self {
        Self {
            raw_path: absolute(input),
            output_path: absolute(output),
            log_space: config.log_space.clone(),
            lut_path: config.lut_path.clone(),
            exposure: config.exposure,
            lens_correct: config.lens_correct,
            metering_mode: config.metering_mode.to_string(),
            red_gain: config.red_gain,
            green_gain: config.green_gain,
            blue_gain: config.blue_gain,
            saturation: config.saturation,
            contrast: config.contrast,
            input_linearization: config.input_linearization,
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// The ground-truth image pipeline
pub trait ReferencePipeline: Send + Sync {
    /// Process `call.raw_path` into `call.output_path`
    fn process_image(&self, call: &PipelineCall) -> anyhow::Result<()>;
}

/// Runs the reference pipeline as a child interpreter
pub struct CommandPipeline {
    config: ReferenceConfig,
}

impl CommandPipeline {
    pub fn new(config: ReferenceConfig) -> Self {
        Self { config }
    }

    /// Command line for one call, with the call JSON as the last argument
    pub fn command(&self, call: &PipelineCall) -> anyhow::Result<Command> {
        let payload = serde_json::to_string(call).context("encoding pipeline call")?;

        let mut cmd = Command::new(&self.config.program);
        for arg in &self.config.args {
            cmd.arg(arg.replace("{bridge}", PYTHON_BRIDGE));
        }
        cmd.arg(payload);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(extra) = &self.config.python_path {
            let mut paths = vec![absolute(extra)];
            if let Some(existing) = std::env::var_os("PYTHONPATH") {
                paths.extend(std::env::split_paths(&existing));
            }
            let joined = std::env::join_paths(paths).context("building PYTHONPATH")?;
            cmd.env("PYTHONPATH", joined);
        }

        Ok(cmd)
    }
}

impl ReferencePipeline for CommandPipeline {
    fn process_image(&self, call: &PipelineCall) -> anyhow::Result<()> {
        let output = self
            .command(call)?
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to launch {}", self.config.program))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            debug!(target: "reference", "{}", line);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}\n{}",
                self.config.program,
                output.status,
                stderr.trim_end()
            );
        }

        Ok(())
    }
}

/// [`PipelineRunner`] over a [`ReferencePipeline`]
pub struct ReferenceRunner {
    pipeline: Arc<dyn ReferencePipeline>,
}

impl ReferenceRunner {
    pub fn new(pipeline: Arc<dyn ReferencePipeline>) -> Self {
        Self { pipeline }
    }

    pub fn from_config(config: &ReferenceConfig) -> Self {
        Self::new(Arc::new(CommandPipeline::new(config.clone())))
    }

    async fn invoke(&self, call: PipelineCall) -> Result<(), HarnessError> {
        let pipeline = Arc::clone(&self.pipeline);
        let output = call.output_path.clone();

        // A panic inside the pipeline surfaces as a JoinError instead of
        // unwinding through the harness
        let outcome = tokio::task::spawn_blocking(move || pipeline.process_image(&call)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = ?e, "Reference pipeline failed");
                return Err(HarnessError::ReferenceRunFailure(format!("{:#}", e)));
            }
            Err(join) => {
                let message = panic_message(join);
                error!(%message, "Reference pipeline panicked");
                return Err(HarnessError::ReferenceRunFailure(message));
            }
        }

        if !output.is_file() {
            return Err(HarnessError::ReferenceRunFailure(format!(
                "pipeline reported success but {} was not written",
                output.display()
            )));
        }
        Ok(())
    }
}

fn panic_message(join: tokio::task::JoinError) -> String {
    if !join.is_panic() {
        return format!("pipeline task cancelled: {join}");
    }
    let payload = join.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("pipeline panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("pipeline panicked: {s}")
    } else {
        "pipeline panicked".to_string()
    }
}

#[async_trait]
impl PipelineRunner for ReferenceRunner {
    fn name(&self) -> &'static str {
        "reference"
    }

    async fn run(&self, input: &Path, output: &Path, config: &PipelineConfig) -> RunResult {
        info!(input = %input.display(), output = %output.display(), "Running reference pipeline");

        if let Err(e) = clear_output(output).await {
            let err = HarnessError::ReferenceRunFailure(format!("preparing output: {e}"));
            return RunResult::failed(output, err.to_diagnostic(None));
        }

        if !input.is_file() {
            let err = HarnessError::ReferenceRunFailure(format!("input not found: {}", input.display()));
            return RunResult::failed(output, err.to_diagnostic(None));
        }

        match self.invoke(PipelineCall::new(input, output, config)).await {
            Ok(()) => {
                info!(output = %output.display(), "Reference processing complete");
                RunResult::succeeded(output)
            }
            Err(e) => RunResult::failed(output, e.to_diagnostic(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rawparity_common::FailureKind;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records the call and writes a placeholder artifact
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<PipelineCall>>,
    }

    impl ReferencePipeline for Recording {
        fn process_image(&self, call: &PipelineCall) -> anyhow::Result<()> {
            std::fs::write(&call.output_path, b"tiff")?;
            self.calls.lock().unwrap().push(call.clone());
            Ok(())
        }
    }

    struct Failing;

    impl ReferencePipeline for Failing {
        fn process_image(&self, _call: &PipelineCall) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("unsupported sensor")).context("decoding RAW")
        }
    }

    struct Panicking;

    impl ReferencePipeline for Panicking {
        fn process_image(&self, _call: &PipelineCall) -> anyhow::Result<()> {
            panic!("index out of bounds")
        }
    }

    struct Silent;

    impl ReferencePipeline for Silent {
        fn process_image(&self, _call: &PipelineCall) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn fixture() -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("sample.raw");
        std::fs::write(&input, b"raw").unwrap();
        let output = tmp.path().join("out/output_python.tiff");
        (tmp, input, output)
    }

    #[tokio::test]
    async fn test_every_field_is_passed_explicitly() {
        let (_tmp, input, output) = fixture();
        let pipeline = Arc::new(Recording::default());
        let runner = ReferenceRunner::new(pipeline.clone());

        let result = runner.run(&input, &output, &PipelineConfig::parity_defaults()).await;
        assert!(result.success, "{:?}", result.error);

        let calls = pipeline.calls.lock().unwrap();
        let call = &calls[0];
        assert_eq!(call.log_space, "Arri LogC3");
        assert_eq!(call.exposure, 0.0);
        assert!(!call.lens_correct);
        assert_eq!(call.lut_path, None);
        assert_eq!(call.metering_mode, "hybrid");
        assert_eq!(call.saturation, 1.25);
        assert!(call.raw_path.is_absolute());
    }

    #[tokio::test]
    async fn test_pipeline_error_becomes_failed_result() {
        let (_tmp, input, output) = fixture();
        let runner = ReferenceRunner::new(Arc::new(Failing));

        let result = runner.run(&input, &output, &PipelineConfig::parity_defaults()).await;
        assert!(!result.success);
        let diagnostic = result.error.unwrap();
        assert_eq!(diagnostic.kind, FailureKind::ReferenceRunFailure);
        assert!(diagnostic.message.contains("unsupported sensor"));
        assert!(diagnostic.message.contains("decoding RAW"));
    }

    #[tokio::test]
    async fn test_pipeline_panic_is_contained() {
        let (_tmp, input, output) = fixture();
        let runner = ReferenceRunner::new(Arc::new(Panicking));

        let result = runner.run(&input, &output, &PipelineConfig::parity_defaults()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().message.contains("index out of bounds"));
    }

    #[tokio::test]
    async fn test_missing_output_is_failure() {
        let (_tmp, input, output) = fixture();
        let runner = ReferenceRunner::new(Arc::new(Silent));

        let result = runner.run(&input, &output, &PipelineConfig::parity_defaults()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, FailureKind::ReferenceRunFailure);
    }

    #[tokio::test]
    async fn test_stale_output_is_not_reported_as_success() {
        let (_tmp, input, output) = fixture();
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, b"previous run").unwrap();

        let runner = ReferenceRunner::new(Arc::new(Silent));
        let result = runner.run(&input, &output, &PipelineConfig::parity_defaults()).await;
        assert!(!result.success);
    }

    #[test]
    fn test_command_embeds_bridge_and_payload() {
        let pipeline = CommandPipeline::new(ReferenceConfig::default());
        let call = PipelineCall::new(
            Path::new("/data/sample.raw"),
            Path::new("/data/out.tiff"),
            &PipelineConfig::parity_defaults(),
        );
        let cmd = pipeline.command(&call).unwrap();

        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(cmd.get_program(), "python3");
        assert_eq!(args[0], "-c");
        assert!(args[1].contains("core.process_image"));
        let decoded: PipelineCall = serde_json::from_str(args.last().unwrap()).unwrap();
        assert_eq!(decoded, call);
        assert!(cmd.get_envs().any(|(k, _)| k == "PYTHONPATH"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_pipeline_reports_stderr() {
        let (_tmp, input, output) = fixture();
        let config = ReferenceConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "echo 'Traceback: boom' >&2; exit 1".into()],
            working_dir: None,
            python_path: None,
        };

        let result = ReferenceRunner::from_config(&config)
            .run(&input, &output, &PipelineConfig::parity_defaults())
            .await;

        let diagnostic = result.error.unwrap();
        assert_eq!(diagnostic.kind, FailureKind::ReferenceRunFailure);
        assert!(diagnostic.message.contains("Traceback: boom"));
    }
}
