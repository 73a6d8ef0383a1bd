use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata recorded for one screenshot written to disk. The PNG itself lands
/// at the requested path; this record travels in the execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureArtifact {
    pub check: String,
    pub output_path: String,
    pub byte_len: usize,
    pub viewport: String,
    pub captured_at: String,
}

/// Per-check run record written as JSON under the artifacts directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckArtifact {
    pub name: String,
    pub target: String,
    pub resolved_address: String,
    pub viewport: String,
    pub started_at: String,
    pub duration_ms: u128,
    pub captures: Vec<String>,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ArtifactKind {
    Screenshot,
    Check,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub path: Option<String>,
    pub data: Value,
}
