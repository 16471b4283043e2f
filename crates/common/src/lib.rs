//! RawParity Common Library
//!
//! Shared data model and configuration for the parity harness: the pipeline
//! parameter record both runners consume, runner and metric records, the
//! orchestrator's stage and failure vocabulary, and the TOML config format.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    ControlBinding, ControlMap, HarnessConfig, SampleSource, SAMPLE_ALIAS,
};
pub use error::{Error, Result};
pub use types::*;

/// RawParity version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "parity.toml";
