//! Core types for RawParity

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

/// Exposure metering strategy understood by both pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeteringMode {
    Hybrid,
    Matrix,
    CenterWeighted,
    HighlightSafe,
    Average,
}

impl Default for MeteringMode {
    fn default() -> Self {
        Self::Hybrid
    }
}

impl MeteringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeteringMode::Hybrid => "hybrid",
            MeteringMode::Matrix => "matrix",
            MeteringMode::CenterWeighted => "center-weighted",
            MeteringMode::HighlightSafe => "highlight-safe",
            MeteringMode::Average => "average",
        }
    }
}

impl std::fmt::Display for MeteringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeteringMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(MeteringMode::Hybrid),
            "matrix" => Ok(MeteringMode::Matrix),
            "center-weighted" => Ok(MeteringMode::CenterWeighted),
            "highlight-safe" => Ok(MeteringMode::HighlightSafe),
            "average" => Ok(MeteringMode::Average),
            other => Err(Error::UnknownMeteringMode(other.to_string())),
        }
    }
}

/// Every tunable parameter needed to reproduce a pipeline run.
///
/// Both runners receive the same value. There is no user-facing way to edit
/// it during a parity run; see [`PipelineConfig::parity_defaults`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Exposure bias in EV. Manual, so auto-exposure is disabled.
    pub exposure: f64,
    pub red_gain: f64,
    pub green_gain: f64,
    pub blue_gain: f64,
    pub saturation: f64,
    pub contrast: f64,
    /// Input linearization gamma
    pub input_linearization: f64,
    /// Target log space, by its display label
    pub log_space: String,
    pub lens_correct: bool,
    pub lut_path: Option<PathBuf>,
    pub metering_mode: MeteringMode,
}

impl PipelineConfig {
    /// The fixed parameter set used for every parity run.
    ///
    /// Mirrors the candidate application's defaults with auto exposure, lens
    /// correction and LUTs switched off so only decoding and color science
    /// are compared.
    pub fn parity_defaults() -> Self {
        Self {
            exposure: 0.0,
            red_gain: 1.0,
            green_gain: 1.0,
            blue_gain: 1.0,
            saturation: 1.25,
            contrast: 1.1,
            input_linearization: 1.0,
            log_space: "Arri LogC3".to_string(),
            lens_correct: false,
            lut_path: None,
            metering_mode: MeteringMode::Hybrid,
        }
    }

    /// Fields in the order they are forced into the candidate UI.
    ///
    /// The log space is excluded; it is selected in its own step.
    pub fn fields(&self) -> Vec<(ConfigField, ControlValue)> {
        vec![
            (ConfigField::Exposure, ControlValue::Number(self.exposure)),
            (ConfigField::RedGain, ControlValue::Number(self.red_gain)),
            (ConfigField::GreenGain, ControlValue::Number(self.green_gain)),
            (ConfigField::BlueGain, ControlValue::Number(self.blue_gain)),
            (ConfigField::Saturation, ControlValue::Number(self.saturation)),
            (ConfigField::Contrast, ControlValue::Number(self.contrast)),
            (
                ConfigField::InputLinearization,
                ControlValue::Number(self.input_linearization),
            ),
            (
                ConfigField::MeteringMode,
                ControlValue::Text(self.metering_mode.to_string()),
            ),
            (ConfigField::LensCorrection, ControlValue::Bool(self.lens_correct)),
            (
                ConfigField::Lut,
                match &self.lut_path {
                    Some(path) => ControlValue::Text(path.to_string_lossy().to_string()),
                    None => ControlValue::Absent,
                },
            ),
        ]
    }
}

/// A PipelineConfig field that has a counterpart control in the candidate UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigField {
    Exposure,
    RedGain,
    GreenGain,
    BlueGain,
    Saturation,
    Contrast,
    InputLinearization,
    MeteringMode,
    LensCorrection,
    Lut,
}

impl ConfigField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigField::Exposure => "exposure",
            ConfigField::RedGain => "red_gain",
            ConfigField::GreenGain => "green_gain",
            ConfigField::BlueGain => "blue_gain",
            ConfigField::Saturation => "saturation",
            ConfigField::Contrast => "contrast",
            ConfigField::InputLinearization => "input_linearization",
            ConfigField::MeteringMode => "metering_mode",
            ConfigField::LensCorrection => "lens_correction",
            ConfigField::Lut => "lut",
        }
    }
}

impl std::fmt::Display for ConfigField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value forced into a single UI control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ControlValue {
    Number(f64),
    Bool(bool),
    Text(String),
    /// The field is unset (e.g. no LUT)
    Absent,
}

impl ControlValue {
    /// Plain JSON form, as handed to the browser
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ControlValue::Number(n) => serde_json::json!(n),
            ControlValue::Bool(b) => serde_json::Value::Bool(*b),
            ControlValue::Text(t) => serde_json::Value::String(t.clone()),
            ControlValue::Absent => serde_json::Value::Null,
        }
    }
}

impl std::fmt::Display for ControlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlValue::Number(n) => write!(f, "{}", n),
            ControlValue::Bool(b) => write!(f, "{}", b),
            ControlValue::Text(t) => write!(f, "{:?}", t),
            ControlValue::Absent => write!(f, "none"),
        }
    }
}

/// Orchestrator states, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ProvisioningSample,
    RunningReference,
    StartingSession,
    RunningCandidate,
    Aligning,
    Scoring,
    Reporting,
    Done,
}

impl Stage {
    /// Process exit code reported when this stage fails
    pub fn exit_code(&self) -> i32 {
        match self {
            Stage::ProvisioningSample => 10,
            Stage::RunningReference => 11,
            Stage::StartingSession => 12,
            Stage::RunningCandidate => 13,
            Stage::Aligning => 14,
            Stage::Scoring => 15,
            Stage::Reporting => 16,
            Stage::Done => 0,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::ProvisioningSample => write!(f, "provisioning-sample"),
            Stage::RunningReference => write!(f, "running-reference"),
            Stage::StartingSession => write!(f, "starting-session"),
            Stage::RunningCandidate => write!(f, "running-candidate"),
            Stage::Aligning => write!(f, "aligning"),
            Stage::Scoring => write!(f, "scoring"),
            Stage::Reporting => write!(f, "reporting"),
            Stage::Done => write!(f, "done"),
        }
    }
}

/// Failure taxonomy shared by runners, the orchestrator and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    SampleUnavailable,
    ReferenceRunFailure,
    SessionStartTimeout,
    SessionStartFailure,
    DriverUnavailable,
    NavigationTimeout,
    ControlNotFound,
    RenderTimeout,
    OptionNotFound,
    ExportTimeout,
    AlignmentImpossible,
    Interrupted,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Why a runner invocation failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostic {
    pub kind: FailureKind,
    pub message: String,
    /// Screenshot captured at the failing wait point, if any
    #[serde(default)]
    pub screenshot: Option<PathBuf>,
}

/// Outcome of one runner invocation. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub artifact_path: PathBuf,
    pub success: bool,
    pub error: Option<RunDiagnostic>,
    /// Page-level console output and errors, kept even on success
    #[serde(default)]
    pub console: Vec<String>,
}

impl RunResult {
    pub fn succeeded(artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            success: true,
            error: None,
            console: Vec::new(),
        }
    }

    pub fn failed(artifact_path: impl Into<PathBuf>, diagnostic: RunDiagnostic) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            success: false,
            error: Some(diagnostic),
            console: Vec::new(),
        }
    }

    pub fn with_console(mut self, console: Vec<String>) -> Self {
        self.console = console;
        self
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }
}

/// Similarity metrics between two aligned images. Derived, read-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub reference_name: String,
    pub candidate_name: String,
    /// (height, width, channels) of the compared region
    pub compared_dimensions: (u32, u32, u32),
    pub reference_bit_depth: u8,
    pub candidate_bit_depth: u8,
    pub max_abs_diff: f64,
    pub mean_abs_error: f64,
    pub mean_squared_error: f64,
    pub psnr_db: f64,
    pub ssim_score: f64,
    #[serde(default)]
    pub reference_sha256: Option<String>,
    #[serde(default)]
    pub candidate_sha256: Option<String>,
}
