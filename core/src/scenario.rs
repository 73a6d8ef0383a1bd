use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;
pub const DEFAULT_SELECTOR_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Scenario {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Import(ImportStep),
    Variable(VariableDecl),
    Check(Check),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStep {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    pub value: String,
}

/// One verification flow: navigate to a target, run its actions in order,
/// releasing the browser session afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub target: String,
    /// Launch viewport. `None` means the desktop default.
    pub viewport: Option<Viewport>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Pause(PauseAction),
    WaitSelector(WaitSelectorAction),
    Viewport(Viewport),
    Click(ClickAction),
    Select(SelectAction),
    Capture(CaptureAction),
    Optional(OptionalBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseAction {
    pub millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitSelectorAction {
    pub selector: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickAction {
    pub selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectAction {
    pub selector: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureAction {
    pub path: String,
}

/// Best-effort group: the first failing action inside the block is tolerated,
/// the rest of the block is abandoned, and the check carries on after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionalBlock {
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected end of input while parsing {0}")]
    UnexpectedEof(&'static str),
    #[error("invalid directive: {0}")]
    InvalidDirective(String),
    #[error("invalid syntax in line: {0}")]
    InvalidSyntax(String),
    #[error("missing required value: {0}")]
    MissingValue(&'static str),
    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

pub fn parse_scenario(source: &str) -> Result<Scenario, ParseError> {
    let mut lines = source.lines().enumerate().peekable();
    let mut steps = Vec::new();
    let mut imports = Vec::new();

    while let Some((_, raw_line)) = next_non_empty(&mut lines) {
        let trimmed = raw_line.trim();
        if trimmed.starts_with("import ") {
            let path = parse_import(trimmed)?;
            imports.push(path.clone());
            steps.push(Step::Import(ImportStep { path }));
        } else if trimmed.starts_with("let ") {
            let step = parse_variable(trimmed)?;
            steps.push(Step::Variable(step));
        } else if trimmed.starts_with("check ") {
            let check = parse_check(trimmed, &mut lines)?;
            steps.push(Step::Check(check));
        } else {
            return Err(ParseError::InvalidDirective(trimmed.to_string()));
        }
    }

    Ok(Scenario { steps, imports })
}

fn parse_check<'a, I>(first_line: &str, lines: &mut PeekableLines<'a, I>) -> Result<Check, ParseError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let cleaned = first_line.trim_end_matches('{').trim();
    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    if tokens.len() != 2 || tokens[0] != "check" {
        return Err(ParseError::InvalidSyntax(first_line.to_string()));
    }
    if !first_line.trim_end().ends_with('{') {
        return Err(ParseError::InvalidSyntax(first_line.to_string()));
    }

    let name = tokens[1];
    let mut target = String::new();
    let mut viewport = None;
    let mut actions = Vec::new();

    loop {
        let (_, raw_line) =
            next_non_empty(lines).ok_or(ParseError::UnexpectedEof("check block"))?;
        let trimmed = raw_line.trim();

        if trimmed.starts_with('}') {
            break;
        }

        if let Some(rest) = trimmed.strip_prefix("target ") {
            target = parse_quoted(rest)?;
        } else if trimmed.starts_with("viewport ") || trimmed == "viewport" {
            let parsed = parse_viewport(trimmed)?;
            // Before any action this is the launch size; afterwards a resize.
            if actions.is_empty() && viewport.is_none() {
                viewport = Some(parsed);
            } else {
                actions.push(Action::Viewport(parsed));
            }
        } else {
            actions.push(parse_action(trimmed, lines)?);
        }
    }

    Ok(Check {
        name: name.to_string(),
        target,
        viewport,
        actions,
    })
}

fn parse_action<'a, I>(
    trimmed: &str,
    lines: &mut PeekableLines<'a, I>,
) -> Result<Action, ParseError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    if let Some(rest) = trimmed.strip_prefix("wait selector ") {
        let (selector, remainder) = take_quoted(rest)?;
        let timeout_ms = parse_timeout_suffix(remainder, trimmed)?;
        return Ok(Action::WaitSelector(WaitSelectorAction {
            selector,
            timeout_ms,
        }));
    }

    if let Some(rest) = trimmed.strip_prefix("wait ") {
        let millis = parse_millis(rest.trim())?;
        return Ok(Action::Pause(PauseAction { millis }));
    }

    if let Some(rest) = trimmed.strip_prefix("click ") {
        let selector = parse_quoted(rest)?;
        return Ok(Action::Click(ClickAction { selector }));
    }

    if let Some(rest) = trimmed.strip_prefix("select ") {
        let (selector, remainder) = take_quoted(rest)?;
        let (value, leftover) = take_quoted(remainder)?;
        if !leftover.trim().is_empty() {
            return Err(ParseError::InvalidSyntax(trimmed.to_string()));
        }
        return Ok(Action::Select(SelectAction { selector, value }));
    }

    if let Some(rest) = trimmed.strip_prefix("capture ") {
        let path = parse_quoted(rest)?;
        if path.is_empty() {
            return Err(ParseError::MissingValue("capture path"));
        }
        return Ok(Action::Capture(CaptureAction { path }));
    }

    if trimmed == "optional {" || trimmed == "optional{" {
        let actions = parse_optional_body(lines)?;
        return Ok(Action::Optional(OptionalBlock { actions }));
    }

    if trimmed.starts_with("viewport ") {
        return Ok(Action::Viewport(parse_viewport(trimmed)?));
    }

    Err(ParseError::InvalidDirective(trimmed.to_string()))
}

fn parse_optional_body<'a, I>(lines: &mut PeekableLines<'a, I>) -> Result<Vec<Action>, ParseError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut actions = Vec::new();
    loop {
        let (_, raw_line) =
            next_non_empty(lines).ok_or(ParseError::UnexpectedEof("optional block"))?;
        let trimmed = raw_line.trim();
        if trimmed.starts_with('}') {
            break;
        }
        actions.push(parse_action(trimmed, lines)?);
    }
    Ok(actions)
}

fn parse_viewport(line: &str) -> Result<Viewport, ParseError> {
    let rest = line
        .strip_prefix("viewport")
        .ok_or_else(|| ParseError::InvalidSyntax(line.to_string()))?
        .trim();
    if rest.is_empty() {
        return Err(ParseError::MissingValue("viewport dimensions"));
    }

    // Accepts both "viewport 375 812" and "viewport 375x812".
    let (width_text, height_text) = if let Some(pair) = rest.split_once(char::is_whitespace) {
        pair
    } else if let Some(pair) = rest.split_once('x') {
        pair
    } else {
        return Err(ParseError::InvalidSyntax(line.to_string()));
    };

    Ok(Viewport {
        width: parse_dimension(width_text)?,
        height: parse_dimension(height_text)?,
    })
}

fn parse_dimension(text: &str) -> Result<u32, ParseError> {
    text.trim()
        .parse::<u32>()
        .map_err(|_| ParseError::InvalidNumber(text.trim().to_string()))
}

fn parse_millis(text: &str) -> Result<u64, ParseError> {
    let cleaned = text.trim().trim_end_matches("ms").trim();
    cleaned
        .parse::<u64>()
        .map_err(|_| ParseError::InvalidNumber(text.trim().to_string()))
}

fn parse_timeout_suffix(remainder: &str, line: &str) -> Result<u64, ParseError> {
    let trimmed = remainder.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_SELECTOR_TIMEOUT_MS);
    }
    let value = trimmed
        .strip_prefix("timeout")
        .ok_or_else(|| ParseError::InvalidSyntax(line.to_string()))?;
    parse_millis(value)
}

fn parse_variable(line: &str) -> Result<VariableDecl, ParseError> {
    let cleaned = line.trim_end_matches(';').trim();
    let rest = cleaned
        .strip_prefix("let")
        .ok_or_else(|| ParseError::InvalidSyntax(line.to_string()))?
        .trim();

    let (name_part, value_part) = rest
        .split_once('=')
        .ok_or_else(|| ParseError::InvalidSyntax(line.to_string()))?;

    let name = name_part.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ParseError::InvalidSyntax(name.to_string()));
    }

    let value = parse_quoted(value_part)?;

    Ok(VariableDecl {
        name: name.to_string(),
        value,
    })
}

fn parse_import(line: &str) -> Result<String, ParseError> {
    let cleaned = line.trim_end_matches(';').trim();
    let rest = cleaned
        .strip_prefix("import")
        .ok_or_else(|| ParseError::InvalidSyntax(line.to_string()))?
        .trim();
    if rest.is_empty() {
        return Err(ParseError::MissingValue("import path"));
    }
    parse_quoted(rest)
}

fn parse_quoted(value: &str) -> Result<String, ParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    if let Some(stripped) = trimmed.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        return Ok(stripped.to_string());
    }

    if trimmed.starts_with('"') || trimmed.ends_with('"') {
        return Err(ParseError::InvalidSyntax(value.to_string()));
    }

    Ok(trimmed.to_string())
}

fn take_quoted(input: &str) -> Result<(String, &str), ParseError> {
    let trimmed = input.trim_start();
    let rest = trimmed
        .strip_prefix('"')
        .ok_or_else(|| ParseError::InvalidSyntax(input.to_string()))?;
    let end = rest
        .find('"')
        .ok_or_else(|| ParseError::InvalidSyntax(input.to_string()))?;
    Ok((rest[..end].to_string(), &rest[end + 1..]))
}

type PeekableLines<'a, I> = std::iter::Peekable<I>;

fn next_non_empty<'a, I>(lines: &mut PeekableLines<'a, I>) -> Option<(usize, &'a str)>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    while let Some((idx, line)) = lines.next() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with('#') {
            continue;
        }
        if !line.trim().is_empty() {
            return Some((idx, line));
        }
    }
    None
}

impl Check {
    pub fn captures(&self) -> Vec<String> {
        fn collect(actions: &[Action], into: &mut Vec<String>) {
            for action in actions {
                match action {
                    Action::Capture(capture) => into.push(capture.path.clone()),
                    Action::Optional(block) => collect(&block.actions, into),
                    _ => {}
                }
            }
        }
        let mut paths = Vec::new();
        collect(&self.actions, &mut paths);
        paths
    }

    pub fn launch_viewport(&self) -> Viewport {
        self.viewport.unwrap_or_default()
    }
}

impl Scenario {
    pub fn checks(&self) -> impl Iterator<Item = &Check> {
        self.steps.iter().filter_map(|step| match step {
            Step::Check(check) => Some(check),
            _ => None,
        })
    }

    pub fn summary(&self) -> ScenarioSummary {
        let import_list: BTreeSet<String> = self.imports.iter().cloned().collect();
        ScenarioSummary {
            total_steps: self.steps.len(),
            imports: import_list.into_iter().collect(),
            variables: self
                .steps
                .iter()
                .filter_map(|step| match step {
                    Step::Variable(var) => Some(VariableSummary {
                        name: var.name.clone(),
                        value: var.value.clone(),
                    }),
                    _ => None,
                })
                .collect(),
            checks: self.checks().map(CheckSummary::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub total_steps: usize,
    pub imports: Vec<String>,
    pub variables: Vec<VariableSummary>,
    pub checks: Vec<CheckSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub name: String,
    pub target: String,
    pub viewport: String,
    pub captures: Vec<String>,
    pub waits: usize,
    pub interactions: usize,
    pub optional_blocks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSummary {
    pub name: String,
    pub value: String,
}

impl From<&Check> for CheckSummary {
    fn from(check: &Check) -> Self {
        fn tally(actions: &[Action], waits: &mut usize, interactions: &mut usize, blocks: &mut usize) {
            for action in actions {
                match action {
                    Action::Pause(_) | Action::WaitSelector(_) => *waits += 1,
                    Action::Click(_) | Action::Select(_) => *interactions += 1,
                    Action::Optional(block) => {
                        *blocks += 1;
                        tally(&block.actions, waits, interactions, blocks);
                    }
                    _ => {}
                }
            }
        }

        let mut waits = 0;
        let mut interactions = 0;
        let mut optional_blocks = 0;
        tally(&check.actions, &mut waits, &mut interactions, &mut optional_blocks);

        Self {
            name: check.name.clone(),
            target: check.target.clone(),
            viewport: check.launch_viewport().to_string(),
            captures: check.captures(),
            waits,
            interactions,
            optional_blocks,
        }
    }
}

impl fmt::Display for ScenarioSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Steps: {}", self.total_steps)?;
        if !self.imports.is_empty() {
            writeln!(f, "Imports:")?;
            for import in &self.imports {
                writeln!(f, "  - {}", import)?;
            }
        }
        if !self.variables.is_empty() {
            writeln!(f, "Variables:")?;
            for var in &self.variables {
                writeln!(f, "  - {} = {}", var.name, var.value)?;
            }
        }
        if !self.checks.is_empty() {
            writeln!(f, "Checks:")?;
            for check in &self.checks {
                writeln!(
                    f,
                    "  - {} @ {} ({}) -> {} capture(s)",
                    check.name,
                    check.target,
                    check.viewport,
                    check.captures.len()
                )?;
                for capture in &check.captures {
                    writeln!(f, "      {}", capture)?;
                }
            }
        }
        Ok(())
    }
}
