//! Error types for the parity harness

use std::path::PathBuf;
use std::time::Duration;

use rawparity_common::{FailureKind, RunDiagnostic, Stage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("No sample could be provisioned (tried: {})", attempts.join("; "))]
    SampleUnavailable { attempts: Vec<String> },

    #[error("Reference pipeline failed: {0}")]
    ReferenceRunFailure(String),

    #[error("Session at {url} not reachable after {:.1}s", waited.as_secs_f64())]
    SessionStartTimeout { url: String, waited: Duration },

    #[error("Session failed to start: {0}")]
    SessionStartFailure(String),

    #[error("Playwright not found. Install with: npx playwright install")]
    DriverUnavailable,

    #[error("Navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("Control not found: {0}")]
    ControlNotFound(String),

    #[error("Preview render timed out: {0}")]
    RenderTimeout(String),

    #[error("Option not found: {0}")]
    OptionNotFound(String),

    #[error("Export timed out: {0}")]
    ExportTimeout(String),

    #[error("Cannot align images: {0}")]
    AlignmentImpossible(String),

    #[error("Run interrupted")]
    Interrupted,

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Config(#[from] rawparity_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl HarnessError {
    /// Taxonomy entry for this error
    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::SampleUnavailable { .. } => FailureKind::SampleUnavailable,
            HarnessError::ReferenceRunFailure(_) => FailureKind::ReferenceRunFailure,
            HarnessError::SessionStartTimeout { .. } => FailureKind::SessionStartTimeout,
            HarnessError::SessionStartFailure(_) => FailureKind::SessionStartFailure,
            HarnessError::DriverUnavailable => FailureKind::DriverUnavailable,
            HarnessError::NavigationTimeout(_) => FailureKind::NavigationTimeout,
            HarnessError::ControlNotFound(_) => FailureKind::ControlNotFound,
            HarnessError::RenderTimeout(_) => FailureKind::RenderTimeout,
            HarnessError::OptionNotFound(_) => FailureKind::OptionNotFound,
            HarnessError::ExportTimeout(_) => FailureKind::ExportTimeout,
            HarnessError::AlignmentImpossible(_) => FailureKind::AlignmentImpossible,
            HarnessError::Interrupted => FailureKind::Interrupted,
            HarnessError::Driver(_)
            | HarnessError::Config(_)
            | HarnessError::Io(_)
            | HarnessError::Json(_)
            | HarnessError::Http(_)
            | HarnessError::Image(_) => FailureKind::Internal,
        }
    }

    /// Rebuild a tagged error from a failed RunResult's diagnostic
    pub fn from_diagnostic(diagnostic: &RunDiagnostic) -> Self {
        let message = diagnostic.message.clone();
        match diagnostic.kind {
            FailureKind::ReferenceRunFailure => HarnessError::ReferenceRunFailure(message),
            FailureKind::SessionStartFailure => HarnessError::SessionStartFailure(message),
            FailureKind::DriverUnavailable => HarnessError::DriverUnavailable,
            FailureKind::NavigationTimeout => HarnessError::NavigationTimeout(message),
            FailureKind::ControlNotFound => HarnessError::ControlNotFound(message),
            FailureKind::RenderTimeout => HarnessError::RenderTimeout(message),
            FailureKind::OptionNotFound => HarnessError::OptionNotFound(message),
            FailureKind::ExportTimeout => HarnessError::ExportTimeout(message),
            FailureKind::AlignmentImpossible => HarnessError::AlignmentImpossible(message),
            FailureKind::Interrupted => HarnessError::Interrupted,
            _ => HarnessError::Driver(message),
        }
    }

    /// Diagnostic record for embedding in a RunResult
    pub fn to_diagnostic(&self, screenshot: Option<PathBuf>) -> RunDiagnostic {
        RunDiagnostic {
            kind: self.kind(),
            message: self.to_string(),
            screenshot,
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// A stage-local failure, tagged with the stage it happened in
#[derive(Error, Debug)]
#[error("stage {stage} failed [{}]: {error}", error.kind())]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: HarnessError,
    /// Screenshot, log or other artifact that explains the failure
    pub diagnostic: Option<PathBuf>,
    /// Page-level messages captured before the failure
    pub console: Vec<String>,
}

impl StageFailure {
    pub fn new(stage: Stage, error: HarnessError) -> Self {
        Self {
            stage,
            error,
            diagnostic: None,
            console: Vec::new(),
        }
    }

    pub fn with_diagnostic(mut self, path: Option<PathBuf>) -> Self {
        self.diagnostic = path;
        self
    }

    pub fn with_console(mut self, console: Vec<String>) -> Self {
        self.console = console;
        self
    }

    pub fn exit_code(&self) -> i32 {
        if matches!(self.error, HarnessError::Interrupted) {
            130
        } else {
            self.stage.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_round_trip_keeps_kind() {
        let kinds = [
            HarnessError::NavigationTimeout("goto".into()),
            HarnessError::ControlNotFound("Red Gain".into()),
            HarnessError::RenderTimeout("canvas".into()),
            HarnessError::OptionNotFound("Arri LogC3".into()),
            HarnessError::ExportTimeout("download".into()),
            HarnessError::ReferenceRunFailure("boom".into()),
        ];
        for err in kinds {
            let diagnostic = err.to_diagnostic(None);
            assert_eq!(HarnessError::from_diagnostic(&diagnostic).kind(), err.kind());
        }
    }

    #[test]
    fn test_stage_failure_names_stage() {
        let failure = StageFailure::new(
            Stage::StartingSession,
            HarnessError::SessionStartFailure("spawn failed".into()),
        );
        let text = failure.to_string();
        assert!(text.contains("starting-session"));
        assert!(text.contains("SessionStartFailure"));
        assert_eq!(failure.exit_code(), 12);
    }

    #[test]
    fn test_interrupted_exit_code() {
        let failure = StageFailure::new(Stage::RunningCandidate, HarnessError::Interrupted);
        assert_eq!(failure.exit_code(), 130);
    }
}
