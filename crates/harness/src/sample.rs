//! Sample provisioning - fetching the input RAW file and exposing it under a
//! stable alias

use std::path::{Path, PathBuf};
use std::time::Duration;

use rawparity_common::config::SampleConfig;
use rawparity_common::{SampleSource, SAMPLE_ALIAS};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};

/// How the alias ended up pointing at the chosen file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKind {
    Symlink,
    Copy,
}

/// Downloads the first available sample into a fixed directory
pub struct SampleProvisioner {
    client: reqwest::Client,
    dest_dir: PathBuf,
}

impl SampleProvisioner {
    pub fn new(config: &SampleConfig, dest_dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            dest_dir: dest_dir.into(),
        })
    }

    /// Path downstream stages read the sample from
    pub fn alias_path(&self) -> PathBuf {
        self.dest_dir.join(SAMPLE_ALIAS)
    }

    /// Try each source in order and alias the first one that succeeds.
    ///
    /// A failed attempt never leaves a partial file behind. Fails with
    /// `SampleUnavailable` only once every candidate is exhausted.
    pub async fn ensure_sample(&self, candidates: &[SampleSource]) -> HarnessResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dest_dir).await?;

        let mut attempts = Vec::new();
        for source in candidates {
            match self.fetch(source).await {
                Ok(path) => {
                    let alias = self.alias_path();
                    let kind = link_alias(&path, &alias)?;
                    info!(
                        sample = %path.display(),
                        alias = %alias.display(),
                        ?kind,
                        "Sample ready"
                    );
                    return Ok(alias);
                }
                Err(e) => {
                    warn!(url = %source.url, error = %e, "Sample source failed, trying next");
                    attempts.push(format!("{}: {}", source.url, e));
                }
            }
        }

        Err(HarnessError::SampleUnavailable { attempts })
    }

    /// Download one source, reusing a previous complete download
    async fn fetch(&self, source: &SampleSource) -> HarnessResult<PathBuf> {
        let target = self.dest_dir.join(&source.filename);
        if tokio::fs::try_exists(&target).await? {
            info!(path = %target.display(), "Sample already present");
            return Ok(target);
        }

        let partial = self.dest_dir.join(format!("{}.part", source.filename));
        info!(url = %source.url, "Downloading sample");

        match self.download_to(&source.url, &partial).await {
            Ok(bytes) => {
                tokio::fs::rename(&partial, &target).await?;
                debug!(path = %target.display(), bytes, "Download complete");
                Ok(target)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), error = %cleanup, "Could not remove partial download");
                    }
                }
                Err(e)
            }
        }
    }

    async fn download_to(&self, url: &str, path: &Path) -> HarnessResult<u64> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// Point `alias` at `target`, replacing whatever was there.
///
/// Falls back to a full copy when a symlink cannot be created.
pub fn link_alias(target: &Path, alias: &Path) -> std::io::Result<AliasKind> {
    if alias.symlink_metadata().is_ok() {
        std::fs::remove_file(alias)?;
    }

    // Both live in the same directory, so link by file name
    let link_target = match (target.parent(), alias.parent(), target.file_name()) {
        (Some(a), Some(b), Some(name)) if a == b => PathBuf::from(name),
        _ => target.to_path_buf(),
    };

    match create_symlink(&link_target, alias) {
        Ok(()) => Ok(AliasKind::Symlink),
        Err(e) => {
            debug!(error = %e, "Symlink failed, copying sample instead");
            std::fs::copy(target, alias)?;
            Ok(AliasKind::Copy)
        }
    }
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks unsupported on this platform",
    ))
}
