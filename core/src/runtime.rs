use crate::artifact::{ArtifactKind, CaptureArtifact, CheckArtifact, StoredArtifact};
use crate::driver::{ChromeFactory, DriverFactory, PageDriver};
use crate::scenario::{Action, Check, Scenario, Step, VariableDecl, Viewport};
use comfy_table::{presets::ASCII_FULL, Table};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

#[derive(Debug)]
pub struct Executor<F: DriverFactory = ChromeFactory> {
    artifacts_dir: PathBuf,
    factory: F,
}

impl Executor<ChromeFactory> {
    pub fn new() -> Self {
        Self::with_factory(ChromeFactory)
    }
}

impl Default for Executor<ChromeFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: DriverFactory> Executor<F> {
    pub fn with_factory(factory: F) -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            factory,
        }
    }

    pub fn artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    pub fn execute(&self, scenario: &Scenario) -> ExecutionOutcome {
        let empty_vars = HashMap::new();
        self.execute_with_vars(scenario, &empty_vars)
    }

    /// Runs the scenario strictly sequentially: variables in declaration order
    /// (CLI overrides win), then each check with its own exclusive browser
    /// session.
    pub fn execute_with_vars(
        &self,
        scenario: &Scenario,
        overrides: &HashMap<String, String>,
    ) -> ExecutionOutcome {
        let mut variables: HashMap<String, String> = HashMap::new();
        let mut report = Vec::new();
        let mut artifacts = Vec::new();

        for step in &scenario.steps {
            match step {
                Step::Import(_) => continue,
                Step::Variable(var) => {
                    report.push(self.process_variable(var, overrides, &mut variables));
                }
                Step::Check(check) => {
                    self.run_check(check, &variables, &mut report, &mut artifacts);
                }
            }
        }

        ExecutionOutcome {
            report: ExecutionReport { steps: report },
            artifacts,
        }
    }

    fn process_variable(
        &self,
        variable: &VariableDecl,
        overrides: &HashMap<String, String>,
        variables: &mut HashMap<String, String>,
    ) -> StepExecution {
        let (raw, note) = match overrides.get(&variable.name) {
            Some(value) => (value.clone(), Some("(override)")),
            None => (variable.value.clone(), None),
        };

        match substitute_variables(&raw, variables) {
            Ok(resolved) => {
                variables.insert(variable.name.clone(), resolved.clone());
                let message = match note {
                    Some(tag) => format!("{} = {} {}", variable.name, resolved, tag),
                    None => format!("{} = {}", variable.name, resolved),
                };
                StepExecution::completed(variable.name.clone(), StepKind::Variable, Some(message))
            }
            Err(err) => StepExecution::failed(
                variable.name.clone(),
                StepKind::Variable,
                Some(format!("failed to resolve variables: {err}")),
            ),
        }
    }

    fn run_check(
        &self,
        check: &Check,
        variables: &HashMap<String, String>,
        report: &mut Vec<StepExecution>,
        artifacts: &mut Vec<StoredArtifact>,
    ) {
        let started_at = now_rfc3339();
        let timer = Instant::now();
        let viewport = check.launch_viewport();

        let address = match resolve_check_address(&check.target, variables) {
            Ok(address) => address,
            Err(err) => {
                report.push(StepExecution::failed(
                    check.name.clone(),
                    StepKind::Check,
                    Some(err),
                ));
                return;
            }
        };

        let mut driver = match self.factory.launch(viewport) {
            Ok(driver) => driver,
            Err(err) => {
                report.push(StepExecution::failed(
                    check.name.clone(),
                    StepKind::Check,
                    Some(format!("failed to acquire browser session: {err}")),
                ));
                return;
            }
        };

        let mut captures: Vec<String> = Vec::new();
        let mut failed = false;

        match driver.navigate(&address) {
            Ok(()) => {
                report.push(StepExecution::completed(
                    check.name.clone(),
                    StepKind::Navigate,
                    Some(format!("navigated to {address} at {viewport}")),
                ));

                let mut current_viewport = viewport;
                if self
                    .run_actions(
                        check,
                        &check.actions,
                        variables,
                        &mut driver,
                        &mut current_viewport,
                        &mut captures,
                        artifacts,
                        report,
                        false,
                    )
                    .is_err()
                {
                    failed = true;
                }
            }
            Err(err) => {
                report.push(StepExecution::failed(
                    check.name.clone(),
                    StepKind::Navigate,
                    Some(err.to_string()),
                ));
                failed = true;
            }
        }

        let data = json!(CheckArtifact {
            name: check.name.clone(),
            target: check.target.clone(),
            resolved_address: address,
            viewport: viewport.to_string(),
            started_at,
            duration_ms: timer.elapsed().as_millis(),
            captures: captures.clone(),
            failed,
        });
        let path = self
            .write_artifact(&format!("check_{}", check.name), &data)
            .map(|p| p.to_string_lossy().to_string());
        artifacts.push(StoredArtifact {
            name: format!("check:{}", check.name),
            kind: ArtifactKind::Check,
            path,
            data,
        });

        let summary = format!(
            "check finished with {} capture(s) in {}ms",
            captures.len(),
            timer.elapsed().as_millis()
        );
        let closing = if failed {
            StepExecution::failed(check.name.clone(), StepKind::Check, Some(summary))
        } else {
            StepExecution::completed(check.name.clone(), StepKind::Check, Some(summary))
        };
        report.push(closing);
        // Dropping the driver here releases the browser session, failed or not.
    }

    #[allow(clippy::too_many_arguments)]
    fn run_actions<D: PageDriver>(
        &self,
        check: &Check,
        actions: &[Action],
        variables: &HashMap<String, String>,
        driver: &mut D,
        current_viewport: &mut Viewport,
        captures: &mut Vec<String>,
        artifacts: &mut Vec<StoredArtifact>,
        report: &mut Vec<StepExecution>,
        tolerate_failures: bool,
    ) -> Result<(), ()> {
        for (index, action) in actions.iter().enumerate() {
            if let Action::Optional(block) = action {
                // Failures inside the block are tolerated; the check goes on.
                self.run_actions(
                    check,
                    &block.actions,
                    variables,
                    driver,
                    current_viewport,
                    captures,
                    artifacts,
                    report,
                    true,
                )?;
                continue;
            }

            match self.apply_action(
                check,
                action,
                variables,
                driver,
                current_viewport,
                captures,
                artifacts,
            ) {
                Ok(execution) => report.push(execution),
                Err(execution) if tolerate_failures => {
                    let remaining = actions.len() - index - 1;
                    let detail = execution.message.clone().unwrap_or_default();
                    report.push(StepExecution::skipped(
                        execution.name,
                        execution.kind,
                        Some(format!(
                            "optional step tolerated a failure: {detail}; \
                             skipping {remaining} remaining optional step(s)"
                        )),
                    ));
                    return Ok(());
                }
                Err(execution) => {
                    report.push(execution);
                    return Err(());
                }
            }
        }
        Ok(())
    }

    fn apply_action<D: PageDriver>(
        &self,
        check: &Check,
        action: &Action,
        variables: &HashMap<String, String>,
        driver: &mut D,
        current_viewport: &mut Viewport,
        captures: &mut Vec<String>,
        artifacts: &mut Vec<StoredArtifact>,
    ) -> Result<StepExecution, StepExecution> {
        let name = check.name.clone();
        match action {
            Action::Pause(pause) => {
                driver.pause(Duration::from_millis(pause.millis));
                Ok(StepExecution::completed(
                    name,
                    StepKind::Pause,
                    Some(format!("paused {}ms", pause.millis)),
                ))
            }
            Action::WaitSelector(wait) => {
                let selector = resolve(&wait.selector, variables, &name, StepKind::WaitSelector)?;
                driver
                    .wait_for_selector(&selector, Duration::from_millis(wait.timeout_ms))
                    .map_err(|err| {
                        StepExecution::failed(
                            name.clone(),
                            StepKind::WaitSelector,
                            Some(err.to_string()),
                        )
                    })?;
                Ok(StepExecution::completed(
                    name,
                    StepKind::WaitSelector,
                    Some(format!("selector '{selector}' attached")),
                ))
            }
            Action::Viewport(viewport) => {
                driver.set_viewport(*viewport).map_err(|err| {
                    StepExecution::failed(name.clone(), StepKind::Viewport, Some(err.to_string()))
                })?;
                *current_viewport = *viewport;
                Ok(StepExecution::completed(
                    name,
                    StepKind::Viewport,
                    Some(format!("viewport resized to {viewport}")),
                ))
            }
            Action::Click(click) => {
                let selector = resolve(&click.selector, variables, &name, StepKind::Click)?;
                driver.click(&selector).map_err(|err| {
                    StepExecution::failed(name.clone(), StepKind::Click, Some(err.to_string()))
                })?;
                Ok(StepExecution::completed(
                    name,
                    StepKind::Click,
                    Some(format!("clicked '{selector}'")),
                ))
            }
            Action::Select(select) => {
                let selector = resolve(&select.selector, variables, &name, StepKind::Select)?;
                let value = resolve(&select.value, variables, &name, StepKind::Select)?;
                driver.select_value(&selector, &value).map_err(|err| {
                    StepExecution::failed(name.clone(), StepKind::Select, Some(err.to_string()))
                })?;
                Ok(StepExecution::completed(
                    name,
                    StepKind::Select,
                    Some(format!("set '{selector}' to '{value}'")),
                ))
            }
            Action::Capture(capture) => {
                let output_path = resolve(&capture.path, variables, &name, StepKind::Capture)?;
                let png = driver.capture_png().map_err(|err| {
                    StepExecution::failed(name.clone(), StepKind::Capture, Some(err.to_string()))
                })?;
                let artifact = write_capture(check, &output_path, &png, *current_viewport)
                    .map_err(|err| {
                        StepExecution::failed(name.clone(), StepKind::Capture, Some(err))
                    })?;
                captures.push(output_path.clone());
                artifacts.push(artifact);
                Ok(StepExecution::completed(
                    name,
                    StepKind::Capture,
                    Some(format!("captured {output_path} ({} bytes)", png.len())),
                ))
            }
            Action::Optional(_) => unreachable!("optional blocks are handled by run_actions"),
        }
    }

    fn write_artifact(&self, label: &str, data: &Value) -> Option<PathBuf> {
        let safe_label = sanitize_label(label);
        let path = self.artifacts_dir.join(format!("{safe_label}.json"));

        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                eprintln!(
                    "[warn] failed to create artifact directory {:?}: {err}",
                    parent
                );
                return None;
            }
        }

        match serde_json::to_vec_pretty(data) {
            Ok(bytes) => match fs::File::create(&path) {
                Ok(mut file) => {
                    if let Err(err) = file.write_all(&bytes) {
                        eprintln!("[warn] failed to write artifact {:?}: {err}", path);
                        None
                    } else {
                        Some(path)
                    }
                }
                Err(err) => {
                    eprintln!("[warn] failed to create artifact {:?}: {err}", path);
                    None
                }
            },
            Err(err) => {
                eprintln!("[warn] failed to serialize artifact '{}': {err}", label);
                None
            }
        }
    }
}

fn write_capture(
    check: &Check,
    output_path: &str,
    png: &[u8],
    viewport: Viewport,
) -> Result<StoredArtifact, String> {
    let path = Path::new(output_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|err| format!("failed to create directory {:?}: {err}", parent))?;
        }
    }
    // Reruns overwrite the same output path silently.
    fs::write(path, png).map_err(|err| format!("failed to write {output_path}: {err}"))?;

    let data = json!(CaptureArtifact {
        check: check.name.clone(),
        output_path: output_path.to_string(),
        byte_len: png.len(),
        viewport: viewport.to_string(),
        captured_at: now_rfc3339(),
    });

    Ok(StoredArtifact {
        name: format!("capture:{}:{}", check.name, file_label(output_path)),
        kind: ArtifactKind::Screenshot,
        path: Some(output_path.to_string()),
        data,
    })
}

fn resolve(
    value: &str,
    variables: &HashMap<String, String>,
    step_name: &str,
    kind: StepKind,
) -> Result<String, StepExecution> {
    substitute_variables(value, variables).map_err(|err| {
        StepExecution::failed(
            step_name.to_string(),
            kind,
            Some(format!("failed to resolve variables: {err}")),
        )
    })
}

fn resolve_check_address(
    target: &str,
    variables: &HashMap<String, String>,
) -> Result<String, String> {
    let resolved =
        substitute_variables(target, variables).map_err(|err| format!("invalid target: {err}"))?;
    if resolved.trim().is_empty() {
        return Err("check has no target address".to_string());
    }
    resolve_target(resolved.trim())
}

/// Converts a target into a navigable address. `http(s)://` and `file://`
/// pass through; anything else is treated as a file-system path, absolutized
/// against the working directory.
fn resolve_target(target: &str) -> Result<String, String> {
    if target.starts_with("http://")
        || target.starts_with("https://")
        || target.starts_with("file://")
    {
        return Ok(target.to_string());
    }
    if target.contains("://") {
        return Err(format!("unsupported address scheme in '{target}'"));
    }

    let path = Path::new(target);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map_err(|err| format!("failed to resolve working directory: {err}"))?
            .join(path)
    };
    Ok(format!("file://{}", absolute.display()))
}

fn substitute_variables(
    value: &str,
    variables: &HashMap<String, String>,
) -> Result<String, String> {
    let mut result = String::with_capacity(value.len());
    let mut cursor = 0;

    while let Some(start_offset) = value[cursor..].find("${") {
        let start_idx = cursor + start_offset;
        result.push_str(&value[cursor..start_idx]);

        let remainder = &value[start_idx + 2..];
        let end_offset = remainder
            .find('}')
            .ok_or_else(|| "unterminated variable placeholder".to_string())?;
        let end_idx = start_idx + 2 + end_offset;
        let token = remainder[..end_offset].trim();

        if token.is_empty() {
            return Err("empty variable placeholder".to_string());
        }

        let replacement = variables
            .get(token)
            .ok_or_else(|| format!("undefined variable '{token}'"))?;
        result.push_str(replacement);
        cursor = end_idx + 1;
    }

    result.push_str(&value[cursor..]);
    Ok(result)
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn file_label(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    sanitize_label(&stem)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub steps: Vec<StepExecution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub report: ExecutionReport,
    pub artifacts: Vec<StoredArtifact>,
}

impl ExecutionReport {
    pub fn has_failures(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.status == ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            writeln!(f, "No steps to execute.")?;
            return Ok(());
        }

        writeln!(f, "Execution results:")?;
        for step in &self.steps {
            let status = match step.status {
                ExecutionStatus::Completed => "completed",
                ExecutionStatus::Skipped => "skipped",
                ExecutionStatus::Failed => "failed",
            };
            writeln!(f, "  - [{}] {} ({:?})", status, step.name, step.kind)?;
            if let Some(message) = &step.message {
                for line in message.lines() {
                    writeln!(f, "      {}", line)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub name: String,
    pub kind: StepKind,
    pub status: ExecutionStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepKind {
    Variable,
    Check,
    Navigate,
    Pause,
    WaitSelector,
    Viewport,
    Click,
    Select,
    Capture,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Skipped,
    Failed,
}

impl StepExecution {
    pub fn completed(name: String, kind: StepKind, message: Option<String>) -> Self {
        Self {
            name,
            kind,
            status: ExecutionStatus::Completed,
            message,
        }
    }

    pub fn failed(name: String, kind: StepKind, message: Option<String>) -> Self {
        Self {
            name,
            kind,
            status: ExecutionStatus::Failed,
            message,
        }
    }

    pub fn skipped(name: String, kind: StepKind, message: Option<String>) -> Self {
        Self {
            name,
            kind,
            status: ExecutionStatus::Skipped,
            message,
        }
    }
}

/// ASCII table of the screenshots a run produced, for the CLI's text output.
pub fn render_capture_table(artifacts: &[StoredArtifact]) -> Option<String> {
    let mut table = Table::new();
    table.load_preset(ASCII_FULL);
    table.set_header(vec!["check", "output", "bytes", "viewport"]);

    let mut rows = 0;
    for artifact in artifacts {
        if artifact.kind != ArtifactKind::Screenshot {
            continue;
        }
        let Ok(capture) = serde_json::from_value::<CaptureArtifact>(artifact.data.clone()) else {
            continue;
        };
        table.add_row(vec![
            capture.check,
            capture.output_path,
            capture.byte_len.to_string(),
            capture.viewport,
        ]);
        rows += 1;
    }

    if rows == 0 {
        None
    } else {
        Some(table.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, DriverFactory, PageDriver};
    use crate::scenario::parse_scenario;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    // Smallest valid PNG header plus padding; enough for "non-empty PNG file"
    // assertions without a real renderer.
    const PNG_STUB: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
        0x52,
    ];

    #[derive(Debug, Default)]
    struct MockBehavior {
        fail_navigation: bool,
        missing_selectors: HashSet<String>,
        failing_clicks: HashSet<String>,
    }

    #[derive(Debug, Default)]
    struct MockFactory {
        behavior: Arc<MockBehavior>,
        log: Arc<Mutex<Vec<String>>>,
        launches: Arc<Mutex<usize>>,
    }

    impl MockFactory {
        fn with_behavior(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(behavior),
                ..Self::default()
            }
        }

        fn log_lines(&self) -> Vec<String> {
            self.log.lock().expect("lock").clone()
        }

        fn launch_count(&self) -> usize {
            *self.launches.lock().expect("lock")
        }
    }

    struct MockDriver {
        behavior: Arc<MockBehavior>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl MockDriver {
        fn record(&self, line: String) {
            self.log.lock().expect("lock").push(line);
        }
    }

    impl DriverFactory for MockFactory {
        type Driver = MockDriver;

        fn launch(&self, viewport: Viewport) -> Result<MockDriver, DriverError> {
            *self.launches.lock().expect("lock") += 1;
            self.log
                .lock()
                .expect("lock")
                .push(format!("launch {viewport}"));
            Ok(MockDriver {
                behavior: self.behavior.clone(),
                log: self.log.clone(),
            })
        }
    }

    impl PageDriver for MockDriver {
        fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
            if self.behavior.fail_navigation {
                return Err(DriverError::Navigation {
                    url: url.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            self.record(format!("navigate {url}"));
            Ok(())
        }

        fn wait_for_selector(
            &mut self,
            selector: &str,
            timeout: Duration,
        ) -> Result<(), DriverError> {
            if self.behavior.missing_selectors.contains(selector) {
                return Err(DriverError::WaitTimeout {
                    selector: selector.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                    message: "The event waited for never came".to_string(),
                });
            }
            self.record(format!("wait {selector}"));
            Ok(())
        }

        fn pause(&mut self, duration: Duration) {
            self.record(format!("pause {}ms", duration.as_millis()));
        }

        fn set_viewport(&mut self, viewport: Viewport) -> Result<(), DriverError> {
            self.record(format!("viewport {viewport}"));
            Ok(())
        }

        fn click(&mut self, selector: &str) -> Result<(), DriverError> {
            if self.behavior.failing_clicks.contains(selector) {
                return Err(DriverError::Interaction {
                    selector: selector.to_string(),
                    message: "element is not clickable".to_string(),
                });
            }
            self.record(format!("click {selector}"));
            Ok(())
        }

        fn select_value(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
            self.record(format!("select {selector}={value}"));
            Ok(())
        }

        fn capture_png(&mut self) -> Result<Vec<u8>, DriverError> {
            self.record("capture".to_string());
            Ok(PNG_STUB.to_vec())
        }
    }

    fn executor_in(dir: &Path, factory: MockFactory) -> Executor<MockFactory> {
        Executor::with_factory(factory).artifacts_dir(dir.join("artifacts"))
    }

    #[test]
    fn add_form_check_produces_both_screenshots_in_order() {
        let temp = tempdir().expect("tempdir");
        let first = temp.path().join("add_page.png");
        let second = temp.path().join("add_page_out.png");
        let source = format!(
            r##"
check add_form {{
  target "http://localhost:8080/add.html"
  viewport 1280 720
  wait selector "#entryForm"
  wait 10
  capture "{}"
  select "#flow" "OUT"
  wait 10
  capture "{}"
}}
"##,
            first.display(),
            second.display()
        );

        let scenario = parse_scenario(&source).expect("parse");
        let factory = MockFactory::default();
        let executor = executor_in(temp.path(), factory);
        let outcome = executor.execute(&scenario);

        assert!(!outcome.report.has_failures(), "{}", outcome.report);
        let first_bytes = fs::read(&first).expect("first screenshot");
        let second_bytes = fs::read(&second).expect("second screenshot");
        assert!(first_bytes.starts_with(&[0x89, b'P', b'N', b'G']));
        assert!(!second_bytes.is_empty());

        // Screenshot artifacts appear in descriptor order.
        let screenshots: Vec<&StoredArtifact> = outcome
            .artifacts
            .iter()
            .filter(|a| a.kind == ArtifactKind::Screenshot)
            .collect();
        assert_eq!(screenshots.len(), 2);
        assert!(screenshots[0].name.contains("add_page"));
        assert!(screenshots[1].name.contains("add_page_out"));

        let check_artifact = outcome
            .artifacts
            .iter()
            .find(|a| a.name == "check:add_form")
            .expect("check artifact");
        let path = check_artifact.path.as_ref().expect("artifact path");
        let contents = fs::read_to_string(path).expect("check artifact readable");
        assert!(contents.contains("add_page_out"));
        assert!(contents.contains("\"failed\": false"));
    }

    #[test]
    fn mandatory_wait_timeout_fails_check_before_any_screenshot() {
        let temp = tempdir().expect("tempdir");
        let shot = temp.path().join("add_page.png");
        let source = format!(
            r##"
check add_form {{
  target "http://localhost:8080/add.html"
  wait selector "#entryForm" timeout 100
  capture "{}"
}}
"##,
            shot.display()
        );

        let scenario = parse_scenario(&source).expect("parse");
        let mut behavior = MockBehavior::default();
        behavior.missing_selectors.insert("#entryForm".to_string());
        let factory = MockFactory::with_behavior(behavior);
        let executor = executor_in(temp.path(), factory);
        let outcome = executor.execute(&scenario);

        assert!(outcome.report.has_failures());
        assert!(!shot.exists(), "no screenshot on the fatal path");
        assert!(outcome
            .artifacts
            .iter()
            .all(|a| a.kind != ArtifactKind::Screenshot));

        let failed = outcome
            .report
            .steps
            .iter()
            .find(|s| s.status == ExecutionStatus::Failed)
            .expect("failed step");
        assert_eq!(failed.kind, StepKind::WaitSelector);
        assert!(failed
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("#entryForm"));
    }

    #[test]
    fn absent_optional_element_degrades_gracefully() {
        let temp = tempdir().expect("tempdir");
        let light = temp.path().join("dashboard_light.png");
        let dark = temp.path().join("dashboard_dark.png");
        let mobile = temp.path().join("dashboard_mobile.png");
        let source = format!(
            r##"
check dashboard {{
  target "http://localhost:8080/index.html"
  capture "{}"
  optional {{
    wait selector "#themeToggle" timeout 100
    click "#themeToggle"
    wait 10
    capture "{}"
  }}
  viewport 375 812
  wait 10
  capture "{}"
}}
"##,
            light.display(),
            dark.display(),
            mobile.display()
        );

        let scenario = parse_scenario(&source).expect("parse");
        let mut behavior = MockBehavior::default();
        behavior.missing_selectors.insert("#themeToggle".to_string());
        let factory = MockFactory::with_behavior(behavior);
        let executor = executor_in(temp.path(), factory);
        let outcome = executor.execute(&scenario);

        // Pre-toggle and post-resize captures exist; the dark capture does not,
        // and the run still counts as clean.
        assert!(!outcome.report.has_failures(), "{}", outcome.report);
        assert!(light.exists());
        assert!(!dark.exists());
        assert!(mobile.exists());

        let skipped = outcome
            .report
            .steps
            .iter()
            .find(|s| s.status == ExecutionStatus::Skipped)
            .expect("tolerated step");
        assert!(skipped
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("optional step tolerated"));
    }

    #[test]
    fn failed_optional_click_still_allows_rest_of_check() {
        let temp = tempdir().expect("tempdir");
        let light = temp.path().join("light.png");
        let dark = temp.path().join("dark.png");
        let source = format!(
            r##"
check dashboard {{
  target "http://localhost:8080/index.html"
  capture "{}"
  optional {{
    click "#themeToggle"
    capture "{}"
  }}
}}
"##,
            light.display(),
            dark.display()
        );

        let scenario = parse_scenario(&source).expect("parse");
        let mut behavior = MockBehavior::default();
        behavior.failing_clicks.insert("#themeToggle".to_string());
        let factory = MockFactory::with_behavior(behavior);
        let executor = executor_in(temp.path(), factory);
        let outcome = executor.execute(&scenario);

        assert!(!outcome.report.has_failures());
        assert!(light.exists());
        assert!(!dark.exists());
    }

    #[test]
    fn navigation_failure_is_fatal_for_the_check() {
        let temp = tempdir().expect("tempdir");
        let shot = temp.path().join("entries.png");
        let source = format!(
            "check entries {{\n  target \"http://localhost:8080/entries.html\"\n  capture \"{}\"\n}}\n",
            shot.display()
        );

        let scenario = parse_scenario(&source).expect("parse");
        let factory = MockFactory::with_behavior(MockBehavior {
            fail_navigation: true,
            ..MockBehavior::default()
        });
        let executor = executor_in(temp.path(), factory);
        let outcome = executor.execute(&scenario);

        assert!(outcome.report.has_failures());
        assert!(!shot.exists());
        let check_artifact = outcome
            .artifacts
            .iter()
            .find(|a| a.name == "check:entries")
            .expect("check artifact recorded even on failure");
        assert_eq!(check_artifact.data["failed"], serde_json::json!(true));
    }

    #[test]
    fn rerun_overwrites_previous_screenshot() {
        let temp = tempdir().expect("tempdir");
        let shot = temp.path().join("entries.png");
        fs::write(&shot, b"stale bytes from an earlier run").expect("seed file");

        let source = format!(
            "check entries {{\n  target \"entries.html\"\n  capture \"{}\"\n}}\n",
            shot.display()
        );
        let scenario = parse_scenario(&source).expect("parse");
        let factory = MockFactory::default();
        let executor = executor_in(temp.path(), factory);
        let outcome = executor.execute(&scenario);

        assert!(!outcome.report.has_failures());
        assert_eq!(fs::read(&shot).expect("overwritten"), PNG_STUB.to_vec());
    }

    #[test]
    fn variables_and_overrides_shape_the_target_address() {
        let temp = tempdir().expect("tempdir");
        let shot = temp.path().join("add.png");
        let source = format!(
            "let base = \"http://localhost:8080\"\n\ncheck add {{\n  target \"${{base}}/add.html\"\n  capture \"{}\"\n}}\n",
            shot.display()
        );
        let scenario = parse_scenario(&source).expect("parse");

        let factory = MockFactory::default();
        let log = factory.log.clone();
        let executor = executor_in(temp.path(), factory);
        let mut overrides = HashMap::new();
        overrides.insert("base".to_string(), "http://127.0.0.1:9999".to_string());
        let outcome = executor.execute_with_vars(&scenario, &overrides);

        assert!(!outcome.report.has_failures());
        let lines = log.lock().expect("lock").clone();
        assert!(lines
            .iter()
            .any(|line| line == "navigate http://127.0.0.1:9999/add.html"));

        let variable_step = outcome
            .report
            .steps
            .iter()
            .find(|s| s.kind == StepKind::Variable)
            .expect("variable step");
        assert!(variable_step
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("(override)"));
    }

    #[test]
    fn each_check_owns_its_own_session_and_viewport() {
        let temp = tempdir().expect("tempdir");
        let desktop = temp.path().join("desktop.png");
        let mobile = temp.path().join("mobile.png");
        let source = format!(
            r##"
check desktop {{
  target "index.html"
  capture "{}"
}}

check mobile {{
  target "entries.html"
  viewport 375 812
  capture "{}"
}}
"##,
            desktop.display(),
            mobile.display()
        );

        let scenario = parse_scenario(&source).expect("parse");
        let factory = MockFactory::default();
        let executor = executor_in(temp.path(), factory);
        let launches = executor.factory.launches.clone();
        let log = executor.factory.log.clone();
        let outcome = executor.execute(&scenario);

        assert!(!outcome.report.has_failures());
        assert_eq!(*launches.lock().expect("lock"), 2);
        let lines = log.lock().expect("lock").clone();
        assert!(lines.contains(&"launch 1280x720".to_string()));
        assert!(lines.contains(&"launch 375x812".to_string()));
        // Relative targets resolve to file addresses.
        assert!(lines
            .iter()
            .any(|line| line.starts_with("navigate file://") && line.ends_with("index.html")));
    }

    #[test]
    fn mid_check_viewport_resize_reaches_the_driver() {
        let temp = tempdir().expect("tempdir");
        let before = temp.path().join("desktop.png");
        let after = temp.path().join("mobile.png");
        let source = format!(
            "check responsive {{\n  target \"index.html\"\n  capture \"{}\"\n  viewport 375 812\n  wait 10\n  capture \"{}\"\n}}\n",
            before.display(),
            after.display()
        );

        let scenario = parse_scenario(&source).expect("parse");
        let factory = MockFactory::default();
        let log = factory.log.clone();
        let executor = executor_in(temp.path(), factory);
        let outcome = executor.execute(&scenario);

        assert!(!outcome.report.has_failures(), "{}", outcome.report);
        let lines = log.lock().expect("lock").clone();
        assert!(lines.contains(&"viewport 375x812".to_string()));
    }

    #[test]
    fn unsupported_scheme_is_rejected_before_launch() {
        let scenario =
            parse_scenario("check odd {\n  target \"ftp://example/add.html\"\n  capture \"x.png\"\n}\n")
                .expect("parse");
        let temp = tempdir().expect("tempdir");
        let factory = MockFactory::default();
        let executor = executor_in(temp.path(), factory);
        let launches = executor.factory.launches.clone();
        let outcome = executor.execute(&scenario);

        assert!(outcome.report.has_failures());
        assert_eq!(*launches.lock().expect("lock"), 0);
    }

    #[test]
    fn capture_table_lists_screenshots() {
        let temp = tempdir().expect("tempdir");
        let shot = temp.path().join("entries.png");
        let source = format!(
            "check entries {{\n  target \"entries.html\"\n  capture \"{}\"\n}}\n",
            shot.display()
        );
        let scenario = parse_scenario(&source).expect("parse");
        let executor = executor_in(temp.path(), MockFactory::default());
        let outcome = executor.execute(&scenario);

        let table = render_capture_table(&outcome.artifacts).expect("table");
        assert!(table.contains("entries"));
        assert!(table.contains("1280x720"));
        assert!(render_capture_table(&[]).is_none());
    }

    #[test]
    fn substitution_reports_undefined_and_unterminated_placeholders() {
        let vars = HashMap::new();
        let err = substitute_variables("${missing}", &vars).expect_err("undefined");
        assert!(err.contains("undefined variable"));
        let err = substitute_variables("${open", &vars).expect_err("unterminated");
        assert!(err.contains("unterminated"));
    }
}
