//! UI driver - Playwright automation of the candidate application
//!
//! Each run generates a self-contained Node script from a JSON configuration
//! block plus a fixed template. The script reports progress on stdout as
//! `@@parity {json}` lines, which are parsed back into step events, console
//! messages and at most one tagged failure. Nothing user-controlled is ever
//! spliced into JavaScript source; it all travels inside the JSON block.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use rawparity_common::config::{ControlBinding, ControlMap, DriverConfig};
use rawparity_common::{ConfigField, ControlValue, FailureKind, PipelineConfig, RunResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::process::{kill_process_group, new_process_group};
use crate::runner::{clear_output, PipelineRunner};
use crate::session::SessionHandle;

/// Prefix marking a machine-readable line on the driver's stdout
pub const EVENT_PREFIX: &str = "@@parity ";

/// Screenshot written next to the candidate output when a step fails
pub const ERROR_SCREENSHOT: &str = "candidate_error.png";

const CONFIG_PLACEHOLDER: &str = "__PARITY_CONFIG__";

const DRIVER_TEMPLATE: &str = r#"
const playwright = require(require.resolve('playwright', { paths: [process.cwd()] }));

const CFG = __PARITY_CONFIG__;
const T = CFG.timeouts;

const emit = (event) => console.log('@@parity ' + JSON.stringify(event));

class StepError extends Error {
  constructor(kind, step, message) {
    super(message);
    this.kind = kind;
    this.step = step;
  }
}

async function step(name, kind, fn) {
  emit({ event: 'step', step: name });
  try {
    return await fn();
  } catch (err) {
    if (err instanceof StepError) throw err;
    throw new StepError(kind, name, err && err.message ? err.message : String(err));
  }
}

function applyControl(args) {
  const { control, labelSelector } = args;
  const binding = control.binding;
  const fire = (el) => {
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
  };
  const byLabel = (text, inner) => {
    const label = Array.from(document.querySelectorAll(labelSelector))
      .find((l) => (l.textContent || '').includes(text));
    if (!label || !label.parentElement) return null;
    return label.parentElement.querySelector(inner);
  };
  // Native setters so framework-tracked values see the change
  const setValue = (el, proto, prop, value) => {
    Object.getOwnPropertyDescriptor(proto, prop).set.call(el, value);
    fire(el);
  };

  if (binding.kind === 'range') {
    const input = byLabel(binding.label, 'input[type="range"]');
    if (!input) return 'no range input labelled "' + binding.label + '"';
    setValue(input, HTMLInputElement.prototype, 'value', String(control.value));
    return 'ok';
  }
  if (binding.kind === 'checkbox') {
    const input = byLabel(binding.label, 'input[type="checkbox"]');
    if (!input) return 'no checkbox labelled "' + binding.label + '"';
    setValue(input, HTMLInputElement.prototype, 'checked', Boolean(control.value));
    return 'ok';
  }
  if (binding.kind === 'select') {
    const wanted = String(control.value);
    const candidates = binding.label
      ? [byLabel(binding.label, 'select')].filter(Boolean)
      : Array.from(document.querySelectorAll('select'));
    const select = candidates.find((s) => Array.from(s.options).some((o) => o.value === wanted));
    if (!select) return 'no select offering option "' + wanted + '"';
    setValue(select, HTMLSelectElement.prototype, 'value', wanted);
    return 'ok';
  }
  return 'unsupported binding kind ' + binding.kind;
}

async function forceControl(page, control) {
  const deadline = Date.now() + T.control;
  let status = 'not attempted';
  while (Date.now() < deadline) {
    status = await page.evaluate(applyControl, { control, labelSelector: CFG.selectors.label });
    if (status === 'ok') break;
    await page.waitForTimeout(100);
  }
  if (status !== 'ok') throw new Error(control.field + ': ' + status);
  emit({ event: 'forced', field: control.field, value: control.value });
  await page.waitForTimeout(T.settle);
}

(async () => {
  let browser = null;
  let page = null;
  try {
    browser = await step('launch', 'DriverUnavailable', () =>
      playwright[CFG.browser].launch({ headless: CFG.headless }));
    page = await browser.newPage();

    page.on('console', (msg) => emit({ event: 'console', text: 'PAGE LOG: ' + msg.text() }));
    page.on('pageerror', (err) => emit({ event: 'console', text: 'PAGE ERROR: ' + err.message }));
    page.on('requestfailed', (req) => emit({
      event: 'console',
      text: 'REQ FAILED: ' + req.url() + ' - ' + ((req.failure() || {}).errorText || 'unknown'),
    }));

    await step('navigate', 'NavigationTimeout', () =>
      page.goto(CFG.url, { timeout: T.navigation, waitUntil: 'load' }));

    await step('upload', 'ControlNotFound', async () => {
      const input = page.locator(CFG.selectors.file_input).first();
      await input.waitFor({ state: 'attached', timeout: T.control });
      await input.setInputFiles(CFG.input);
    });

    await step('render', 'RenderTimeout', () =>
      page.locator(CFG.selectors.render_surface).first().waitFor({ timeout: T.render }));

    for (const control of CFG.controls) {
      await step('control:' + control.field, 'ControlNotFound', () => forceControl(page, control));
    }

    await step('log-space', 'OptionNotFound', async () => {
      const select = page.locator('select').filter({ hasText: CFG.log_space }).first();
      await select.selectOption({ label: CFG.log_space }, { timeout: T.control });
    });

    await page.waitForTimeout(T.pre_export);

    const button = await step('locate-export', 'ControlNotFound', async () => {
      const locator = page.locator(CFG.selectors.export_button).first();
      await locator.waitFor({ timeout: T.control });
      return locator;
    });

    const download = await step('export', 'ExportTimeout', async () => {
      const [dl] = await Promise.all([
        page.waitForEvent('download', { timeout: T.export }),
        button.click(),
      ]);
      return dl;
    });

    await step('save', 'Internal', () => download.saveAs(CFG.output));
    emit({ event: 'done', suggested_filename: download.suggestedFilename() });
  } catch (err) {
    let screenshot = null;
    if (page) {
      try {
        await page.screenshot({ path: CFG.screenshot, fullPage: true });
        screenshot = CFG.screenshot;
      } catch (_) {}
    }
    emit({
      event: 'failed',
      kind: err.kind || 'Internal',
      step: err.step || 'unknown',
      message: err && err.message ? err.message : String(err),
      screenshot,
    });
    process.exitCode = 1;
  } finally {
    if (browser) await browser.close().catch(() => {});
  }
})();
"#;

/// One control the script must force, in application order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptControl {
    pub field: ConfigField,
    pub binding: ControlBinding,
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ScriptTimeouts {
    navigation: u64,
    control: u64,
    render: u64,
    export: u64,
    settle: u64,
    pre_export: u64,
}

/// The JSON block embedded in the generated script
#[derive(Debug, Serialize)]
struct ScriptConfig<'a> {
    browser: &'static str,
    headless: bool,
    url: &'a str,
    input: PathBuf,
    output: PathBuf,
    screenshot: PathBuf,
    selectors: &'a rawparity_common::config::Selectors,
    timeouts: ScriptTimeouts,
    controls: Vec<ScriptControl>,
    log_space: &'a str,
}

/// Match every PipelineConfig field to its binding.
///
/// `fixed` bindings are checked here and dropped from the list; a fixed value
/// that disagrees with the requested one, or a binding that cannot carry the
/// field's value, fails with `ControlNotFound` before any browser work.
pub fn resolve_controls(map: &ControlMap, config: &PipelineConfig) -> HarnessResult<Vec<ScriptControl>> {
    let mut controls = Vec::new();

    for (field, value) in config.fields() {
        let binding = map.binding(field);
        let compatible = match (binding, &value) {
            (ControlBinding::Fixed { value: fixed }, requested) => {
                if !same_value(fixed, requested) {
                    return Err(HarnessError::ControlNotFound(format!(
                        "{} has no control in the candidate UI and is fixed at {}, but {} was requested",
                        field, fixed, requested
                    )));
                }
                debug!(%field, %fixed, "Field fixed by candidate, no control to force");
                continue;
            }
            (ControlBinding::Range { .. }, ControlValue::Number(_)) => true,
            (ControlBinding::Checkbox { .. }, ControlValue::Bool(_)) => true,
            (ControlBinding::Select { .. }, ControlValue::Text(_) | ControlValue::Number(_)) => true,
            _ => false,
        };

        if !compatible {
            return Err(HarnessError::ControlNotFound(format!(
                "{} is bound to {:?}, which cannot be set to {}",
                field, binding, value
            )));
        }

        controls.push(ScriptControl {
            field,
            binding: binding.clone(),
            value: value.to_json(),
        });
    }

    Ok(controls)
}

fn same_value(a: &ControlValue, b: &ControlValue) -> bool {
    match (a, b) {
        (ControlValue::Number(x), ControlValue::Number(y)) => (x - y).abs() < 1e-9,
        _ => a == b,
    }
}

/// Generate the driver script for one run
pub fn build_script(
    driver: &DriverConfig,
    url: &str,
    input: &Path,
    output: &Path,
    config: &PipelineConfig,
) -> HarnessResult<String> {
    let controls = resolve_controls(&driver.controls, config)?;
    let output = absolute(output);
    let screenshot = screenshot_path(&output);

    let script_config = ScriptConfig {
        browser: driver.browser.as_str(),
        headless: driver.headless,
        url,
        input: absolute(input),
        output,
        screenshot,
        selectors: &driver.selectors,
        timeouts: ScriptTimeouts {
            navigation: driver.navigation_timeout_ms,
            control: driver.control_timeout_ms,
            render: driver.render_timeout_ms,
            export: driver.export_timeout_ms,
            settle: driver.settle_ms,
            pre_export: driver.pre_export_ms,
        },
        controls,
        log_space: &config.log_space,
    };

    let json = serde_json::to_string_pretty(&script_config)?;
    Ok(DRIVER_TEMPLATE.replacen(CONFIG_PLACEHOLDER, &json, 1))
}

/// Where the failure screenshot for `output` goes
pub fn screenshot_path(output: &Path) -> PathBuf {
    match output.parent() {
        Some(dir) => dir.join(ERROR_SCREENSHOT),
        None => PathBuf::from(ERROR_SCREENSHOT),
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// A machine-readable line from the driver script
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DriverEvent {
    Step {
        step: String,
    },
    Forced {
        field: ConfigField,
        value: serde_json::Value,
    },
    Console {
        text: String,
    },
    Done {
        #[serde(default)]
        suggested_filename: Option<String>,
    },
    Failed {
        kind: FailureKind,
        step: String,
        message: String,
        #[serde(default)]
        screenshot: Option<PathBuf>,
    },
}

/// Everything learned from one driver run's stdout
#[derive(Debug, Default)]
pub struct DriverOutcome {
    /// Steps started, in order
    pub steps: Vec<String>,
    pub forced: Vec<ConfigField>,
    pub console: Vec<String>,
    pub completed: bool,
    pub suggested_filename: Option<String>,
    pub failure: Option<HarnessError>,
    pub screenshot: Option<PathBuf>,
}

/// Parse the driver's stdout. Lines without the event prefix are ignored.
pub fn parse_driver_output(stdout: &str) -> DriverOutcome {
    let mut outcome = DriverOutcome::default();

    for line in stdout.lines() {
        let Some(payload) = line.strip_prefix(EVENT_PREFIX) else {
            if !line.trim().is_empty() {
                debug!(target: "driver", "{}", line);
            }
            continue;
        };

        let event: DriverEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, line, "Unparseable driver event");
                continue;
            }
        };

        match event {
            DriverEvent::Step { step } => outcome.steps.push(step),
            DriverEvent::Forced { field, .. } => outcome.forced.push(field),
            DriverEvent::Console { text } => outcome.console.push(text),
            DriverEvent::Done { suggested_filename } => {
                outcome.completed = true;
                outcome.suggested_filename = suggested_filename;
            }
            DriverEvent::Failed {
                kind,
                step,
                message,
                screenshot,
            } => {
                let diagnostic = rawparity_common::RunDiagnostic {
                    kind,
                    message: format!("step {step}: {message}"),
                    screenshot: None,
                };
                outcome.failure = Some(HarnessError::from_diagnostic(&diagnostic));
                outcome.screenshot = screenshot;
            }
        }
    }

    outcome
}

/// Failure kind for a step that never reported back
pub fn step_failure_kind(step: &str) -> FailureKind {
    match step {
        "launch" => FailureKind::DriverUnavailable,
        "navigate" => FailureKind::NavigationTimeout,
        "render" => FailureKind::RenderTimeout,
        "log-space" => FailureKind::OptionNotFound,
        "export" => FailureKind::ExportTimeout,
        s if s == "upload" || s == "locate-export" || s.starts_with("control:") => {
            FailureKind::ControlNotFound
        }
        _ => FailureKind::Internal,
    }
}

/// Drives the candidate application in a real browser
pub struct UiDriver {
    config: DriverConfig,
    /// Directory `playwright` is resolved from (the candidate app)
    node_dir: PathBuf,
}

impl UiDriver {
    /// Create a driver, verifying Playwright is available from `node_dir`
    pub async fn new(config: DriverConfig, node_dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let node_dir = node_dir.into();
        Self::check_playwright_installed(&node_dir).await?;
        Ok(Self { config, node_dir })
    }

    /// Check if Playwright is installed
    async fn check_playwright_installed(dir: &Path) -> HarnessResult<()> {
        let output = TokioCommand::new("npx")
            .args(["--no-install", "playwright", "--version"])
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(HarnessError::DriverUnavailable),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Load, configure and export through the candidate UI.
    ///
    /// Never returns an error: failures come back as a failed RunResult whose
    /// diagnostic names the step, with console output attached.
    pub async fn run_candidate(
        &self,
        session: &SessionHandle,
        input: &Path,
        output: &Path,
        config: &PipelineConfig,
    ) -> RunResult {
        info!(url = %session.base_url(), input = %input.display(), "Running candidate pipeline");

        match self.drive(session.base_url(), input, output, config).await {
            Ok(outcome) => {
                info!(
                    output = %output.display(),
                    suggested = outcome.suggested_filename.as_deref().unwrap_or("-"),
                    "Candidate export saved"
                );
                RunResult::succeeded(output).with_console(outcome.console)
            }
            Err((err, screenshot, console)) => {
                warn!(kind = %err.kind(), error = %err, "Candidate run failed");
                RunResult::failed(output, err.to_diagnostic(screenshot)).with_console(console)
            }
        }
    }

    async fn drive(
        &self,
        url: &str,
        input: &Path,
        output: &Path,
        config: &PipelineConfig,
    ) -> Result<DriverOutcome, DriveFailure> {
        let fail = |e: HarnessError| (e, None, Vec::new());

        if !input.is_file() {
            return Err(fail(HarnessError::ControlNotFound(format!(
                "input not found: {}",
                input.display()
            ))));
        }
        let script = build_script(&self.config, url, input, output, config).map_err(fail)?;
        clear_output(output).await.map_err(|e| fail(e.into()))?;
        let stale = screenshot_path(&absolute(output));
        if let Err(e) = tokio::fs::remove_file(&stale).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %stale.display(), error = %e, "Could not remove previous screenshot");
            }
        }

        let dir = tempfile::tempdir().map_err(|e| fail(e.into()))?;
        let script_path = dir.path().join("parity-driver.js");
        tokio::fs::write(&script_path, script)
            .await
            .map_err(|e| fail(e.into()))?;
        debug!(script = %script_path.display(), "Running Playwright script");

        let mut cmd = Command::new("node");
        cmd.arg(&script_path)
            .current_dir(&self.node_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        new_process_group(&mut cmd);
        let mut cmd = TokioCommand::from(cmd);
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            warn!(error = %e, "Could not launch node");
            fail(HarnessError::DriverUnavailable)
        })?;
        let pid = child.id();
        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let budget = Duration::from_millis(self.config.total_budget_ms(config.fields().len()));
        let status = match tokio::time::timeout(budget, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => return Err(fail(e.into())),
            Err(_) => {
                warn!(budget_ms = budget.as_millis() as u64, "Driver exceeded its time budget, killing it");
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Driver already gone after group kill");
                }
                None
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let outcome = parse_driver_output(&stdout);
        for line in &outcome.console {
            warn!(target: "page", "{}", line);
        }

        classify_exit(outcome, status, &stderr, budget, output)
    }
}

/// Failure reported alongside its screenshot and the page console
type DriveFailure = (HarnessError, Option<PathBuf>, Vec<String>);

/// Decide how a finished (or killed) driver run ended.
///
/// `status` is `None` when the run was killed for exceeding `budget`.
fn classify_exit(
    mut outcome: DriverOutcome,
    status: Option<ExitStatus>,
    stderr: &str,
    budget: Duration,
    output: &Path,
) -> Result<DriverOutcome, DriveFailure> {
    if let Some(failure) = outcome.failure.take() {
        let console = std::mem::take(&mut outcome.console);
        return Err((failure, outcome.screenshot.take(), console));
    }

    let console = outcome.console.clone();
    let Some(status) = status else {
        let step = outcome.steps.last().cloned().unwrap_or_else(|| "launch".to_string());
        let diagnostic = rawparity_common::RunDiagnostic {
            kind: step_failure_kind(&step),
            message: format!("step {step}: no progress within {}ms", budget.as_millis()),
            screenshot: None,
        };
        return Err((HarnessError::from_diagnostic(&diagnostic), None, console));
    };

    if !status.success() {
        let err = if stderr.contains("Cannot find module") {
            HarnessError::DriverUnavailable
        } else {
            HarnessError::Driver(format!("driver exited with {}: {}", status, tail(stderr, 20)))
        };
        return Err((err, None, console));
    }

    if !outcome.completed {
        let last = outcome.steps.last().map(String::as_str).unwrap_or("none");
        return Err((
            HarnessError::Driver(format!(
                "driver exited cleanly without reporting completion (last step: {})",
                last
            )),
            None,
            console,
        ));
    }

    if !output.is_file() {
        return Err((
            HarnessError::Driver(format!(
                "driver reported completion but {} was not written",
                output.display()
            )),
            None,
            console,
        ));
    }

    Ok(outcome)
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_string(&mut buf).await {
            debug!(error = %e, "Reading driver output failed");
        }
    }
    buf
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// [`PipelineRunner`] for the candidate side, bound to a live session
pub struct CandidateRunner<'a> {
    driver: &'a UiDriver,
    session: &'a SessionHandle,
}

impl<'a> CandidateRunner<'a> {
    pub fn new(driver: &'a UiDriver, session: &'a SessionHandle) -> Self {
        Self { driver, session }
    }
}

#[async_trait]
impl PipelineRunner for CandidateRunner<'_> {
    fn name(&self) -> &'static str {
        "candidate"
    }

    async fn run(&self, input: &Path, output: &Path, config: &PipelineConfig) -> RunResult {
        self.driver.run_candidate(self.session, input, output, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script_json(script: &str) -> serde_json::Value {
        let start = script.find("const CFG = ").unwrap() + "const CFG = ".len();
        let end = script[start..].find(";\nconst T").unwrap() + start;
        serde_json::from_str(&script[start..end]).unwrap()
    }

    #[test]
    fn test_default_bindings_resolve_in_fixed_order() {
        let controls = resolve_controls(&ControlMap::default(), &PipelineConfig::parity_defaults()).unwrap();
        let fields: Vec<&str> = controls.iter().map(|c| c.field.as_str()).collect();

        // Lens correction and LUT are fixed by the candidate and skipped
        assert_eq!(
            fields,
            vec![
                "exposure",
                "red_gain",
                "green_gain",
                "blue_gain",
                "saturation",
                "contrast",
                "input_linearization",
                "metering_mode",
            ]
        );
        assert_eq!(controls[4].value, serde_json::json!(1.25));
        assert_eq!(controls[7].value, serde_json::json!("hybrid"));
    }

    #[test]
    fn test_fixed_binding_mismatch_fails_loudly() {
        let mut config = PipelineConfig::parity_defaults();
        config.lens_correct = true;

        let err = resolve_controls(&ControlMap::default(), &config).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ControlNotFound);
        assert!(err.to_string().contains("lens_correction"));

        let mut config = PipelineConfig::parity_defaults();
        config.lut_path = Some(PathBuf::from("film.cube"));
        assert!(resolve_controls(&ControlMap::default(), &config).is_err());
    }

    #[test]
    fn test_incompatible_binding_is_rejected() {
        let map = ControlMap {
            metering_mode: ControlBinding::Range {
                label: "Metering".into(),
            },
            ..Default::default()
        };
        let err = resolve_controls(&map, &PipelineConfig::parity_defaults()).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ControlNotFound);
    }

    #[test]
    fn test_script_embeds_config_as_json() {
        let script = build_script(
            &DriverConfig::default(),
            "http://localhost:5174",
            Path::new("/data/sample.raw"),
            Path::new("/data/out/output_web.tiff"),
            &PipelineConfig::parity_defaults(),
        )
        .unwrap();

        assert!(!script.contains(CONFIG_PLACEHOLDER));
        let cfg = script_json(&script);
        assert_eq!(cfg["url"], "http://localhost:5174");
        assert_eq!(cfg["browser"], "chromium");
        assert_eq!(cfg["log_space"], "Arri LogC3");
        assert_eq!(cfg["screenshot"], "/data/out/candidate_error.png");
        assert_eq!(cfg["timeouts"]["render"], 60_000);
        assert_eq!(cfg["controls"][0]["binding"]["kind"], "range");
        assert_eq!(cfg["controls"][0]["binding"]["label"], "Exposure (EV)");
        assert_eq!(cfg["selectors"]["file_input"], r#"input[type="file"][accept*=".ARW"]"#);
    }

    #[test]
    fn test_quotes_in_labels_stay_inside_json() {
        let mut driver = DriverConfig::default();
        driver.controls.exposure = ControlBinding::Range {
            label: "Exposure ('EV')\"; process.exit(3); \"".into(),
        };
        let script = build_script(
            &driver,
            "http://localhost:1",
            Path::new("/in.raw"),
            Path::new("/out.tiff"),
            &PipelineConfig::parity_defaults(),
        )
        .unwrap();

        let cfg = script_json(&script);
        assert_eq!(
            cfg["controls"][0]["binding"]["label"],
            "Exposure ('EV')\"; process.exit(3); \""
        );
    }

    #[test]
    fn test_parse_successful_run() {
        let stdout = "\
noise from node
@@parity {\"event\":\"step\",\"step\":\"navigate\"}
@@parity {\"event\":\"console\",\"text\":\"PAGE LOG: worker ready\"}
@@parity {\"event\":\"forced\",\"field\":\"saturation\",\"value\":1.25}
@@parity {\"event\":\"done\",\"suggested_filename\":\"export.tiff\"}
";
        let outcome = parse_driver_output(stdout);
        assert!(outcome.completed);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.steps, vec!["navigate"]);
        assert_eq!(outcome.forced, vec![ConfigField::Saturation]);
        assert_eq!(outcome.console, vec!["PAGE LOG: worker ready"]);
        assert_eq!(outcome.suggested_filename.as_deref(), Some("export.tiff"));
    }

    #[test]
    fn test_parse_failure_keeps_kind_and_screenshot() {
        let stdout = "\
@@parity {\"event\":\"step\",\"step\":\"render\"}
@@parity {\"event\":\"console\",\"text\":\"PAGE ERROR: wasm trap\"}
@@parity {\"event\":\"failed\",\"kind\":\"RenderTimeout\",\"step\":\"render\",\"message\":\"Timeout 60000ms exceeded\",\"screenshot\":\"/out/candidate_error.png\"}
@@parity {not json
";
        let outcome = parse_driver_output(stdout);
        assert!(!outcome.completed);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind(), FailureKind::RenderTimeout);
        assert!(failure.to_string().contains("step render"));
        assert_eq!(outcome.screenshot, Some(PathBuf::from("/out/candidate_error.png")));
        assert_eq!(outcome.console, vec!["PAGE ERROR: wasm trap"]);
    }

    #[cfg(unix)]
    fn exited(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_exit_without_done_is_driver_error() {
        let outcome = parse_driver_output("@@parity {\"event\":\"step\",\"step\":\"export\"}\n");
        let (err, screenshot, _) = classify_exit(
            outcome,
            Some(exited(0)),
            "",
            Duration::from_secs(1),
            Path::new("/nonexistent/output_web.tiff"),
        )
        .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Internal);
        assert!(err.to_string().contains("last step: export"));
        assert!(screenshot.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_classification() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output = tmp.path().join("output_web.tiff");
        let done = "@@parity {\"event\":\"done\"}\n";

        // Completed but nothing saved
        let (err, _, _) = classify_exit(
            parse_driver_output(done),
            Some(exited(0)),
            "",
            Duration::from_secs(1),
            &output,
        )
        .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Internal);

        std::fs::write(&output, b"tiff").unwrap();
        let outcome = classify_exit(
            parse_driver_output(done),
            Some(exited(0)),
            "",
            Duration::from_secs(1),
            &output,
        )
        .unwrap();
        assert!(outcome.completed);

        let (err, _, _) = classify_exit(
            DriverOutcome::default(),
            Some(exited(1)),
            "Error: Cannot find module 'playwright'",
            Duration::from_secs(1),
            &output,
        )
        .unwrap_err();
        assert_eq!(err.kind(), FailureKind::DriverUnavailable);

        // Killed while rendering
        let killed = parse_driver_output("@@parity {\"event\":\"step\",\"step\":\"render\"}\n");
        let (err, _, _) = classify_exit(killed, None, "", Duration::from_secs(1), &output).unwrap_err();
        assert_eq!(err.kind(), FailureKind::RenderTimeout);
    }

    #[test]
    fn test_silent_steps_map_to_distinct_kinds() {
        assert_eq!(step_failure_kind("navigate"), FailureKind::NavigationTimeout);
        assert_eq!(step_failure_kind("upload"), FailureKind::ControlNotFound);
        assert_eq!(step_failure_kind("render"), FailureKind::RenderTimeout);
        assert_eq!(step_failure_kind("control:contrast"), FailureKind::ControlNotFound);
        assert_eq!(step_failure_kind("log-space"), FailureKind::OptionNotFound);
        assert_eq!(step_failure_kind("export"), FailureKind::ExportTimeout);
    }
}
