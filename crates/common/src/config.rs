//! Harness configuration
//!
//! Loaded from a TOML file; every field has a default so a missing file or a
//! partial file is valid. The pipeline parameters themselves are never read
//! from here (see [`crate::PipelineConfig::parity_defaults`]); this file only
//! describes where things live and how the candidate UI is driven.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{ConfigField, ControlValue};

/// Top-level harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub paths: PathsConfig,
    pub sample: SampleConfig,
    pub reference: ReferenceConfig,
    pub session: SessionConfig,
    pub driver: DriverConfig,
    pub report: ReportConfig,
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults if absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!(path = %path.display(), "Loading harness config");
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.sample.urls.is_empty() {
            return Err(Error::InvalidConfig(
                "sample.urls must list at least one source".to_string(),
            ));
        }
        if self.session.serve_command.is_empty() {
            return Err(Error::InvalidConfig(
                "session.serve_command must not be empty".to_string(),
            ));
        }
        if self.reference.program.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "reference.program must not be empty".to_string(),
            ));
        }
        if self.report.heatmap_gain <= 0.0 {
            return Err(Error::InvalidConfig(
                "report.heatmap_gain must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where run artifacts are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the sample, both outputs and the report
    pub parity_dir: PathBuf,
    pub reference_output: String,
    pub candidate_output: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            parity_dir: PathBuf::from("verification/parity"),
            reference_output: "output_python.tiff".to_string(),
            candidate_output: "output_web.tiff".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn sample_path(&self) -> PathBuf {
        self.parity_dir.join(SAMPLE_ALIAS)
    }

    pub fn reference_output_path(&self) -> PathBuf {
        self.parity_dir.join(&self.reference_output)
    }

    pub fn candidate_output_path(&self) -> PathBuf {
        self.parity_dir.join(&self.candidate_output)
    }
}

/// Canonical file name downstream stages read the sample from
pub const SAMPLE_ALIAS: &str = "sample.raw";

/// One remote source for the sample RAW file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSource {
    pub url: String,
    pub filename: String,
}

impl SampleSource {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
        }
    }
}

/// Sample provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    /// Tried in order until one downloads
    pub urls: Vec<SampleSource>,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            urls: vec![
                SampleSource::new(
                    "https://github.com/letmaik/rawpy/raw/v0.19.0/tests/iss624.dng",
                    "iss624.dng",
                ),
                SampleSource::new(
                    "https://github.com/letmaik/rawpy/raw/v0.19.0/tests/iss31.dng",
                    "iss31.dng",
                ),
            ],
            request_timeout_secs: 120,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_9_3) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/35.0.1916.47 Safari/537.36"
                .to_string(),
        }
    }
}

/// How the reference pipeline is invoked
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Interpreter or executable
    pub program: String,
    /// Leading arguments. `{bridge}` expands to the built-in call bridge.
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Prepended to PYTHONPATH so the reference package imports from source
    pub python_path: Option<PathBuf>,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-c".to_string(), "{bridge}".to_string()],
            working_dir: None,
            python_path: Some(PathBuf::from("src")),
        }
    }
}

/// Backing service lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Candidate application directory
    pub working_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Relative to `working_dir`; its absence triggers `build_command`
    pub build_artifact: PathBuf,
    pub build_command: Vec<String>,
    /// `{port}` expands to the configured port
    pub serve_command: Vec<String>,
    pub startup_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Time between SIGTERM and SIGKILL on teardown
    pub shutdown_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("raw-alchemy-web"),
            host: "localhost".to_string(),
            port: 5174,
            build_artifact: PathBuf::from("dist"),
            build_command: vec!["npm".into(), "run".into(), "build".into()],
            serve_command: vec![
                "npm".into(),
                "run".into(),
                "preview".into(),
                "--".into(),
                "--port".into(),
                "{port}".into(),
            ],
            startup_timeout_secs: 30,
            poll_interval_ms: 250,
            shutdown_grace_ms: 2000,
        }
    }
}

impl SessionConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Browser choice for the UI driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// UI driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub browser: Browser,
    pub headless: bool,
    pub navigation_timeout_ms: u64,
    pub control_timeout_ms: u64,
    /// Decode can take a while on large RAW files
    pub render_timeout_ms: u64,
    /// Export runs the full-resolution pipeline
    pub export_timeout_ms: u64,
    /// Pause after each forced control so reactive updates settle
    pub settle_ms: u64,
    /// Pause between the last forced control and export
    pub pre_export_ms: u64,
    pub selectors: Selectors,
    pub controls: ControlMap,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            navigation_timeout_ms: 30_000,
            control_timeout_ms: 10_000,
            render_timeout_ms: 60_000,
            export_timeout_ms: 120_000,
            settle_ms: 100,
            pre_export_ms: 1_000,
            selectors: Selectors::default(),
            controls: ControlMap::default(),
        }
    }
}

impl DriverConfig {
    /// Upper bound for a whole driver session: every wait point plus slack
    pub fn total_budget_ms(&self, control_count: usize) -> u64 {
        let per_control = self.control_timeout_ms + self.settle_ms;
        self.navigation_timeout_ms
            + self.control_timeout_ms
            + self.render_timeout_ms
            + per_control * (control_count as u64 + 1)
            + self.pre_export_ms
            + self.export_timeout_ms
            + 30_000
    }
}

/// CSS selectors for the fixed parts of the candidate UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    /// File input, filtered by its accepted extensions
    pub file_input: String,
    /// Appears once the decoded preview is rendered
    pub render_surface: String,
    pub export_button: String,
    /// Elements whose text identifies a labelled control
    pub label: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            file_input: r#"input[type="file"][accept*=".ARW"]"#.to_string(),
            render_surface: "canvas".to_string(),
            export_button: "button:has-text('Export')".to_string(),
            label: "label".to_string(),
        }
    }
}

/// How one PipelineConfig field is reached in the candidate UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlBinding {
    /// Range input next to a label containing `label`
    Range { label: String },
    /// Select element offering the value as an option value
    Select {
        #[serde(default)]
        label: Option<String>,
    },
    /// Checkbox next to a label containing `label`
    Checkbox { label: String },
    /// No control exists; the candidate always behaves as `value`
    Fixed { value: ControlValue },
}

impl ControlBinding {
    fn range(label: &str) -> Self {
        ControlBinding::Range {
            label: label.to_string(),
        }
    }
}

/// One binding per PipelineConfig field, so none can be left unmapped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlMap {
    pub exposure: ControlBinding,
    pub red_gain: ControlBinding,
    pub green_gain: ControlBinding,
    pub blue_gain: ControlBinding,
    pub saturation: ControlBinding,
    pub contrast: ControlBinding,
    pub input_linearization: ControlBinding,
    pub metering_mode: ControlBinding,
    pub lens_correction: ControlBinding,
    pub lut: ControlBinding,
}

impl Default for ControlMap {
    fn default() -> Self {
        Self {
            exposure: ControlBinding::range("Exposure (EV)"),
            red_gain: ControlBinding::range("Red Gain"),
            green_gain: ControlBinding::range("Green Gain"),
            blue_gain: ControlBinding::range("Blue Gain"),
            saturation: ControlBinding::range("Saturation"),
            contrast: ControlBinding::range("Contrast"),
            input_linearization: ControlBinding::range("Input Linearization"),
            metering_mode: ControlBinding::Select { label: None },
            lens_correction: ControlBinding::Fixed {
                value: ControlValue::Bool(false),
            },
            lut: ControlBinding::Fixed {
                value: ControlValue::Absent,
            },
        }
    }
}

impl ControlMap {
    pub fn binding(&self, field: ConfigField) -> &ControlBinding {
        match field {
            ConfigField::Exposure => &self.exposure,
            ConfigField::RedGain => &self.red_gain,
            ConfigField::GreenGain => &self.green_gain,
            ConfigField::BlueGain => &self.blue_gain,
            ConfigField::Saturation => &self.saturation,
            ConfigField::Contrast => &self.contrast,
            ConfigField::InputLinearization => &self.input_linearization,
            ConfigField::MeteringMode => &self.metering_mode,
            ConfigField::LensCorrection => &self.lens_correction,
            ConfigField::Lut => &self.lut,
        }
    }
}

/// Report rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Amplification applied to the difference panel
    pub heatmap_gain: f64,
    /// Panels wider than this are downscaled in the heatmap only
    pub max_panel_width: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            heatmap_gain: 10.0,
            max_panel_width: 1024,
        }
    }
}
