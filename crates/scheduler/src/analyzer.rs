//! # Analyzer Collaborator
//!
//! The scheduler never inspects targets itself. It hands each target to
//! an [`Analyzer`] and reacts to the report or failure.
//!
//! ## Contract
//!
//! - `analyze` is the only suspension point in ingestion.
//! - Implementations MUST NOT retry internally; the scheduler owns retry.
//! - The call may be cancelled by the scheduler's timeout. A cancelled
//!   call counts as a failed attempt.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Successful analysis of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub bytes_saved: u64,
    #[serde(default)]
    pub category_tags: Vec<String>,
    #[serde(default)]
    pub before_fingerprint: String,
    #[serde(default)]
    pub after_fingerprint: String,
}

/// Failure reported by an [`Analyzer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerError(pub String);

impl fmt::Display for AnalyzerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "analysis failed: {}", self.0)
    }
}

impl std::error::Error for AnalyzerError {}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, target: &str) -> Result<AnalysisReport, AnalyzerError>;
}
