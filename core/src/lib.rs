pub mod artifact;
pub mod driver;
pub mod runtime;
pub mod scenario;
pub mod validation;

pub use artifact::{ArtifactKind, CaptureArtifact, CheckArtifact, StoredArtifact};
pub use driver::{ChromeFactory, ChromeSession, DriverError, DriverFactory, PageDriver};
pub use runtime::{
    render_capture_table, ExecutionOutcome, ExecutionReport, ExecutionStatus, Executor,
    StepExecution, StepKind,
};
pub use scenario::{
    parse_scenario, Action, CaptureAction, Check, CheckSummary, ClickAction, ImportStep,
    OptionalBlock, ParseError, PauseAction, Scenario, ScenarioSummary, SelectAction, Step,
    VariableDecl, VariableSummary, Viewport, WaitSelectorAction,
};
pub use validation::{has_errors, validate_scenario, Diagnostic, DiagnosticLevel};
