//! Full verify run against the real reference package and web app.
//!
//! Needs network access, python with `raw_alchemy`, and an installed
//! candidate app with Playwright browsers:
//!
//! ```text
//! RAWPARITY_CONFIG=parity.toml cargo test -p rawparity-harness --test browser_verify -- --ignored
//! ```

use std::path::PathBuf;

use rawparity_common::{HarnessConfig, DEFAULT_CONFIG_FILE};
use rawparity_harness::Orchestrator;

#[tokio::test]
#[ignore = "requires python, node, Playwright browsers and network access"]
async fn verify_end_to_end() {
    let config_path = std::env::var("RAWPARITY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = HarnessConfig::load(&config_path).unwrap();
    let tmp = tempfile::TempDir::new().unwrap();

    let orchestrator = Orchestrator::new(config).with_output_dir(tmp.path());
    let outcome = match orchestrator.verify().await {
        Ok(outcome) => outcome,
        Err(failure) => panic!("{failure} (diagnostic: {:?})", failure.diagnostic),
    };

    assert!(outcome.reference.success);
    assert!(outcome.candidate.success);
    assert!(outcome.comparison.files.markdown.is_file());
    assert!(outcome.comparison.report.psnr_db > 0.0);
}
