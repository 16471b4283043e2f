//! Session management - building, spawning and tearing down the backing
//! service the candidate pipeline runs in

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use rawparity_common::config::SessionConfig;

use crate::error::{HarnessError, HarnessResult};
use crate::process::{new_process_group, terminate_process_tree};

/// File the service's stdout/stderr are written to, inside the log dir
pub const SESSION_LOG: &str = "session.log";

/// Handle to a running backing service.
///
/// Owned exclusively by whoever started it. Dropping the handle stops the
/// service, so teardown happens on every exit path including panics.
#[derive(Debug)]
pub struct SessionHandle {
    child: Option<Child>,
    pid: u32,
    base_url: String,
    port: u16,
    grace: Duration,
    log_path: Option<PathBuf>,
}

impl SessionHandle {
    fn new(child: Child, base_url: String, port: u16, grace: Duration) -> Self {
        Self {
            pid: child.id(),
            child: Some(child),
            base_url,
            port,
            grace,
            log_path: None,
        }
    }

    /// Root URL of the running service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Process (and process group) id of the service
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn is_stopped(&self) -> bool {
        self.child.is_none()
    }

    /// Stop the service and all of its descendants. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            info!(pid = self.pid, url = %self.base_url, "Stopping session");
            terminate_process_tree(&mut child, self.grace);
        }
    }

    /// Stop the service without blocking the async runtime. Idempotent.
    pub async fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        info!(pid = self.pid, url = %self.base_url, "Stopping session");

        let grace = self.grace;
        let pid = self.pid;
        let joined = tokio::task::spawn_blocking(move || {
            terminate_process_tree(&mut child, grace);
        })
        .await;
        if let Err(e) = joined {
            warn!(pid, error = %e, "Teardown task failed, killing process group");
            crate::process::kill_process_group(pid);
        }
    }

    /// Poll the root URL until it answers, the process dies, or time runs out
    async fn wait_until_ready(&mut self, timeout: Duration, interval: Duration) -> HarnessResult<()> {
        let url = self.base_url.clone();
        let child = &mut self.child;
        poll_ready(&url, timeout, interval, || {
            let child = child.as_mut()?;
            match child.try_wait() {
                Ok(Some(status)) => Some(format!("service exited with {status} before becoming reachable")),
                Ok(None) => None,
                Err(e) => Some(format!("could not query service process: {e}")),
            }
        })
        .await
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts and stops sessions for one candidate application
pub struct SessionManager {
    config: SessionConfig,
    log_dir: Option<PathBuf>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            log_dir: None,
        }
    }

    /// Redirect the service's output to `dir/session.log`
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Build if needed, spawn the service in its own process group, and wait
    /// for it to become reachable.
    ///
    /// On any failure after spawning, the process group is torn down before
    /// the error is returned.
    pub async fn start_session(&self) -> HarnessResult<SessionHandle> {
        self.ensure_build().await?;

        let port = resolve_port(self.config.port, find_free_port)?;
        let base_url = format!("http://{}:{}", self.config.host, port);

        let (program, args) = self
            .config
            .serve_command
            .split_first()
            .ok_or_else(|| HarnessError::SessionStartFailure("empty serve command".to_string()))?;
        let args: Vec<String> = args.iter().map(|a| a.replace("{port}", &port.to_string())).collect();

        info!(
            program = %program,
            ?args,
            dir = %self.config.working_dir.display(),
            port,
            "Spawning session"
        );

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null());

        let log_path = match &self.log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(SESSION_LOG);
                let out = File::create(&path)?;
                let err = out.try_clone()?;
                cmd.stdout(out).stderr(err);
                Some(path)
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
                None
            }
        };

        let child = new_process_group(&mut cmd).spawn().map_err(|e| {
            HarnessError::SessionStartFailure(format!("Failed to spawn {}: {}", program, e))
        })?;

        let mut handle = SessionHandle::new(
            child,
            base_url,
            port,
            Duration::from_millis(self.config.shutdown_grace_ms),
        );
        handle.log_path = log_path;

        let ready = handle
            .wait_until_ready(
                Duration::from_secs(self.config.startup_timeout_secs),
                Duration::from_millis(self.config.poll_interval_ms),
            )
            .await;

        match ready {
            Ok(()) => {
                info!(url = %handle.base_url(), pid = handle.pid(), "Session is ready");
                Ok(handle)
            }
            Err(e) => {
                warn!(error = %e, "Session did not become ready, tearing down");
                handle.shutdown().await;
                Err(e)
            }
        }
    }

    /// Stop a session. Safe to call repeatedly.
    pub async fn stop_session(&self, handle: &mut SessionHandle) {
        handle.shutdown().await;
    }

    /// Run the build command when the prebuilt artifact is missing
    pub async fn ensure_build(&self) -> HarnessResult<()> {
        let artifact = self.config.working_dir.join(&self.config.build_artifact);
        if artifact.exists() {
            debug!(artifact = %artifact.display(), "Build artifact present");
            return Ok(());
        }

        let (program, args) = match self.config.build_command.split_first() {
            Some(parts) => parts,
            None => {
                return Err(HarnessError::SessionStartFailure(format!(
                    "{} is missing and no build command is configured",
                    artifact.display()
                )))
            }
        };

        info!(artifact = %artifact.display(), "Build artifact missing, running build");
        let status = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                HarnessError::SessionStartFailure(format!("Failed to run build {}: {}", program, e))
            })?;

        if !status.success() {
            return Err(HarnessError::SessionStartFailure(format!(
                "build command exited with {}",
                status
            )));
        }
        if !artifact.exists() {
            return Err(HarnessError::SessionStartFailure(format!(
                "build finished but {} was not produced",
                artifact.display()
            )));
        }

        Ok(())
    }
}

/// Poll `url` until it answers with a non-error status.
///
/// `exited` is consulted between attempts; returning `Some(reason)` aborts the
/// wait with `SessionStartFailure`.
pub async fn poll_ready<F>(
    url: &str,
    timeout: Duration,
    interval: Duration,
    mut exited: F,
) -> HarnessResult<()>
where
    F: FnMut() -> Option<String>,
{
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let start = Instant::now();
    let mut attempts = 0usize;

    while start.elapsed() < timeout {
        attempts += 1;

        if let Some(reason) = exited() {
            return Err(HarnessError::SessionStartFailure(reason));
        }

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                debug!(url, attempts, "Session answered");
                return Ok(());
            }
            Ok(resp) => {
                warn!(url, status = %resp.status(), "Readiness probe returned error status");
            }
            Err(e) => {
                if attempts == 1 {
                    info!(url, "Waiting for session to start...");
                }
                // Connection refused is expected while the service is starting
                if !e.is_connect() {
                    warn!(url, error = %e, "Readiness probe error");
                }
            }
        }

        sleep(interval).await;
    }

    Err(HarnessError::SessionStartTimeout {
        url: url.to_string(),
        waited: start.elapsed(),
    })
}

/// Port to serve on; 0 asks `free` for an unused one
fn resolve_port<F>(configured: u16, free: F) -> HarnessResult<u16>
where
    F: FnOnce() -> std::io::Result<u16>,
{
    if configured != 0 {
        return Ok(configured);
    }
    free().map_err(|e| HarnessError::SessionStartFailure(format!("no free port available: {}", e)))
}

/// Find a free port to use
pub fn find_free_port() -> std::io::Result<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
