use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use ocular_core::{
    parse_scenario, render_capture_table, validate_scenario, Diagnostic, DiagnosticLevel,
    ExecutionOutcome, Executor, Scenario, ScenarioSummary, Step, StoredArtifact,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(author, version, about = "Ocular visual verification runner")]
struct OcularCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse and validate a scenario file and print what a run would do
    Plan {
        /// Path to the scenario file
        input: PathBuf,
        /// Output format
        #[arg(long, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Override a variable (format: key=value). Repeat for multiple overrides.
        #[arg(long = "var", value_parser = parse_key_val, value_name = "KEY=VALUE", action = ArgAction::Append)]
        vars: Vec<(String, String)>,
    },
    /// Execute a scenario file against a headless browser
    Run {
        /// Path to the scenario file
        input: PathBuf,
        /// Output format
        #[arg(long, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Override a variable (format: key=value). Repeat for multiple overrides.
        #[arg(long = "var", value_parser = parse_key_val, value_name = "KEY=VALUE", action = ArgAction::Append)]
        vars: Vec<(String, String)>,
        /// Run only the named check. Repeat to run several.
        #[arg(long = "check", value_name = "NAME", action = ArgAction::Append)]
        checks: Vec<String>,
        /// Directory for per-check run records
        #[arg(long = "artifacts-dir", value_name = "DIR", default_value = "artifacts")]
        artifacts_dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = OcularCli::parse();

    match cli.command {
        Command::Plan {
            input,
            format,
            vars,
        } => {
            let scenario = load_scenario(&input)?;
            let overrides = collect_overrides(vars);
            let diagnostics = validate_scenario(&scenario);
            let summary = scenario.summary();
            output_plan(summary, &diagnostics, format, &overrides)?;
            if ocular_core::has_errors(&diagnostics) {
                anyhow::bail!("validation failed");
            }
        }
        Command::Run {
            input,
            format,
            vars,
            checks,
            artifacts_dir,
        } => {
            let mut scenario = load_scenario(&input)?;
            let overrides = collect_overrides(vars);
            let diagnostics = validate_scenario(&scenario);
            if ocular_core::has_errors(&diagnostics) {
                print_diagnostics(&diagnostics);
                anyhow::bail!("validation failed");
            }

            if !checks.is_empty() {
                filter_checks(&mut scenario, &checks)?;
            }

            let summary = scenario.summary();
            let executor = Executor::new().artifacts_dir(artifacts_dir);
            let outcome = executor.execute_with_vars(&scenario, &overrides);
            let failed = outcome.report.has_failures();
            output_run(summary, &diagnostics, outcome, format, &overrides)?;
            if failed {
                anyhow::bail!("one or more checks failed");
            }
        }
    }

    Ok(())
}

fn load_scenario(path: &PathBuf) -> anyhow::Result<Scenario> {
    let mut visited = HashSet::new();
    load_scenario_recursive(path, &mut visited)
}

fn load_scenario_recursive(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
) -> anyhow::Result<Scenario> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        // An already-visited import is skipped rather than looping forever.
        return Ok(Scenario::default());
    }

    let content = fs::read_to_string(&canonical)?;
    let parsed = parse_scenario(&content)?;
    let base_dir = canonical.parent().unwrap_or_else(|| Path::new(""));

    let mut steps = Vec::new();
    let mut imports = Vec::new();

    for step in parsed.steps {
        match step {
            Step::Import(import_step) => {
                let import_path = base_dir.join(&import_step.path);
                let import_display = import_path.to_string_lossy().to_string();
                let imported = load_scenario_recursive(&import_path, visited)?;
                imports.push(import_display);
                steps.extend(imported.steps);
                imports.extend(imported.imports);
            }
            other => steps.push(other),
        }
    }

    Ok(Scenario { steps, imports })
}

/// Keeps variables and only the named checks, preserving declaration order.
fn filter_checks(scenario: &mut Scenario, names: &[String]) -> anyhow::Result<()> {
    let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
    let known: HashSet<&str> = scenario.checks().map(|check| check.name.as_str()).collect();
    for name in &wanted {
        if !known.contains(name) {
            anyhow::bail!("unknown check '{name}'");
        }
    }

    scenario.steps.retain(|step| match step {
        Step::Check(check) => wanted.contains(check.name.as_str()),
        _ => true,
    });
    Ok(())
}

fn output_plan(
    summary: ScenarioSummary,
    diagnostics: &[Diagnostic],
    format: OutputFormat,
    overrides: &HashMap<String, String>,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => {
            let payload = json!({
                "summary": summary,
                "diagnostics": diagnostics,
                "overrides": overrides,
            });
            print_structured(&payload, format)?;
        }
        OutputFormat::Text => {
            print_diagnostics(diagnostics);
            println!("{summary}");
            print_overrides(overrides);
        }
    }
    Ok(())
}

fn output_run(
    summary: ScenarioSummary,
    diagnostics: &[Diagnostic],
    outcome: ExecutionOutcome,
    format: OutputFormat,
    overrides: &HashMap<String, String>,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => {
            let payload = json!({
                "summary": summary,
                "diagnostics": diagnostics,
                "execution": outcome.report,
                "artifacts": outcome.artifacts,
                "overrides": overrides,
            });
            print_structured(&payload, format)?;
        }
        OutputFormat::Text => {
            print_diagnostics(diagnostics);
            println!("{summary}");
            print_overrides(overrides);
            println!("{}", outcome.report);
            if let Some(table) = render_capture_table(&outcome.artifacts) {
                println!("\nCaptured screenshots:");
                println!("{table}");
            }
            if !outcome.artifacts.is_empty() {
                println!("\nArtifacts:");
                for StoredArtifact {
                    name, kind, path, ..
                } in &outcome.artifacts
                {
                    match path {
                        Some(p) => println!("  - {} ({:?}) -> {}", name, kind, p),
                        None => println!("  - {} ({:?})", name, kind),
                    }
                }
            }
            if outcome.report.has_failures() {
                eprintln!("\n[warn] one or more checks failed");
            }
        }
    }
    Ok(())
}

fn print_structured(payload: &serde_json::Value, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(payload)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(payload)?),
        OutputFormat::Text => unreachable!("text output has its own path"),
    }
    Ok(())
}

fn print_overrides(overrides: &HashMap<String, String>) {
    if overrides.is_empty() {
        return;
    }
    println!("Overrides (--var):");
    let mut keys: Vec<&String> = overrides.keys().collect();
    keys.sort();
    for key in keys {
        println!("  - {} = {}", key, overrides[key]);
    }
    println!();
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }

    println!("Diagnostics:");
    for diagnostic in diagnostics {
        let level = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warn",
        };
        match &diagnostic.location {
            Some(location) => println!("  - [{level}] {location}: {}", diagnostic.message),
            None => println!("  - [{level}] {}", diagnostic.message),
        }
    }
    println!();
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        };
        write!(f, "{value}")
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].trim().is_empty() {
        return Err(format!("expected KEY=VALUE, got '{s}'"));
    }
    Ok((parts[0].trim().to_string(), parts[1].to_string()))
}

fn collect_overrides(vars: Vec<(String, String)>) -> HashMap<String, String> {
    vars.into_iter().collect()
}
