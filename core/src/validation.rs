use crate::scenario::{Action, Check, Scenario, Step};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub location: Option<String>,
    pub message: String,
}

impl Diagnostic {
    fn error(location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            location,
            message: message.into(),
        }
    }

    fn warning(location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            location,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.level, DiagnosticLevel::Error)
    }
}

/// Static review of a parsed scenario. Errors block execution; warnings point
/// at descriptors that run but probably do not verify what the author meant.
pub fn validate_scenario(scenario: &Scenario) -> Vec<Diagnostic> {
    let mut ctx = ValidationContext::new();

    let mut seen_names: HashSet<&str> = HashSet::new();
    let mut seen_captures: HashSet<String> = HashSet::new();

    for step in &scenario.steps {
        match step {
            Step::Import(import) => {
                if import.path.trim().is_empty() {
                    ctx.error("import has an empty path");
                }
            }
            Step::Variable(var) => {
                if var.value.trim().is_empty() {
                    ctx.push(format!("let {}", var.name));
                    ctx.warning("variable declared with an empty value");
                    ctx.pop();
                }
            }
            Step::Check(check) => {
                ctx.push(format!("check {}", check.name));
                if !seen_names.insert(check.name.as_str()) {
                    ctx.warning("duplicate check name; run reports will be ambiguous");
                }
                validate_check(check, &mut ctx, &mut seen_captures);
                ctx.pop();
            }
        }
    }

    ctx.finish()
}

fn validate_check(check: &Check, ctx: &mut ValidationContext, seen_captures: &mut HashSet<String>) {
    let target = check.target.trim();
    if target.is_empty() {
        ctx.error("check has no target address");
    } else if let Some((scheme, _)) = target.split_once("://") {
        if !matches!(scheme, "http" | "https" | "file") {
            ctx.error(format!("unsupported address scheme '{scheme}'"));
        }
    }

    if let Some(viewport) = check.viewport {
        validate_viewport(viewport.width, viewport.height, ctx);
    }

    if check.captures().is_empty() {
        ctx.warning("check captures no screenshots; nothing will be verifiable");
    }

    validate_actions(&check.actions, ctx, seen_captures);
}

fn validate_actions(
    actions: &[Action],
    ctx: &mut ValidationContext,
    seen_captures: &mut HashSet<String>,
) {
    for action in actions {
        match action {
            Action::Pause(pause) => {
                if pause.millis == 0 {
                    ctx.warning("zero-length wait has no effect");
                }
                if pause.millis > 120_000 {
                    ctx.warning(format!("wait of {}ms exceeds two minutes", pause.millis));
                }
            }
            Action::WaitSelector(wait) => {
                ctx.push(format!("wait selector {}", wait.selector));
                if wait.selector.trim().is_empty() {
                    ctx.error("selector is empty");
                }
                if wait.timeout_ms == 0 {
                    ctx.error("selector timeout of 0ms can never succeed");
                } else if wait.timeout_ms > 120_000 {
                    ctx.warning(format!("timeout of {}ms exceeds two minutes", wait.timeout_ms));
                }
                ctx.pop();
            }
            Action::Viewport(viewport) => {
                validate_viewport(viewport.width, viewport.height, ctx);
            }
            Action::Click(click) => {
                if click.selector.trim().is_empty() {
                    ctx.error("click has an empty selector");
                }
            }
            Action::Select(select) => {
                ctx.push(format!("select {}", select.selector));
                if select.selector.trim().is_empty() {
                    ctx.error("selector is empty");
                }
                if select.value.trim().is_empty() {
                    ctx.error("select has an empty value");
                }
                ctx.pop();
            }
            Action::Capture(capture) => {
                ctx.push(format!("capture {}", capture.path));
                if capture.path.trim().is_empty() {
                    ctx.error("capture path is empty");
                } else {
                    if !capture.path.to_ascii_lowercase().ends_with(".png") {
                        ctx.warning("capture path does not end in .png");
                    }
                    if !seen_captures.insert(capture.path.clone()) {
                        ctx.warning("capture path is reused; earlier screenshot will be overwritten");
                    }
                }
                ctx.pop();
            }
            Action::Optional(block) => {
                ctx.push("optional".to_string());
                if block.actions.is_empty() {
                    ctx.warning("optional block is empty");
                }
                validate_actions(&block.actions, ctx, seen_captures);
                ctx.pop();
            }
        }
    }
}

fn validate_viewport(width: u32, height: u32, ctx: &mut ValidationContext) {
    if width == 0 || height == 0 {
        ctx.error(format!("viewport {width}x{height} has a zero dimension"));
    } else if width < 200 || height < 200 {
        ctx.warning(format!("viewport {width}x{height} is unusually small"));
    }
}

struct ValidationContext {
    stack: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl ValidationContext {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn push(&mut self, label: String) {
        self.stack.push(label);
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    fn location(&self) -> Option<String> {
        if self.stack.is_empty() {
            None
        } else {
            Some(self.stack.join(" > "))
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(self.location(), message));
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(self.location(), message));
    }

    fn finish(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
