//! Capabilities the scheduler consumes from collaborators.
//!
//! Executors do the actual stage work; artifact checkers decide whether a
//! previously completed stage can still be trusted on resume.

use crate::core::{StageDefinition, StageResult};
use crate::store::SharedStateStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a stage executor sees while running one attempt.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// The running session.
    pub session_id: String,
    /// The pipeline mode.
    pub mode: String,
    /// Directory the pipeline works on.
    pub target_dir: PathBuf,
    /// One-based attempt number.
    pub attempt: usize,
    /// Results recorded before the current round, oldest first.
    pub prior_results: Vec<StageResult>,
    /// Shared documents, locked under a holder id scoped to this stage.
    pub state: SharedStateStore,
}

impl StageContext {
    /// Returns the latest prior result for a stage.
    #[must_use]
    pub fn prior_result(&self, stage: &str) -> Option<&StageResult> {
        self.prior_results.iter().rev().find(|r| r.name == stage)
    }
}

/// Successful executor output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorOutput {
    /// Human-readable summary.
    pub summary: String,
    /// Paths of produced artifacts, relative to the target directory.
    pub artifacts: Vec<String>,
}

impl ExecutorOutput {
    /// Creates an output with a summary and no artifacts.
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            artifacts: Vec::new(),
        }
    }

    /// Adds an artifact path.
    #[must_use]
    pub fn with_artifact(mut self, path: impl Into<String>) -> Self {
        self.artifacts.push(path.into());
        self
    }
}

impl From<String> for ExecutorOutput {
    fn from(summary: String) -> Self {
        Self::new(summary)
    }
}

impl From<&str> for ExecutorOutput {
    fn from(summary: &str) -> Self {
        Self::new(summary)
    }
}

/// Runs the work behind a stage.
///
/// Called under a deadline by [`super::StageRunner`]. An attempt that misses
/// its deadline is abandoned, not cancelled, so implementations must be
/// safe to leave running and must clean up their own partial work.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Executes one attempt of a stage.
    async fn execute(
        &self,
        stage_name: &str,
        executor_kind: &str,
        ctx: &StageContext,
    ) -> anyhow::Result<ExecutorOutput>;
}

/// Which declared outputs of a stage exist on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReport {
    /// The stage checked.
    pub stage: String,
    /// Declared output patterns.
    pub required: Vec<String>,
    /// Patterns that matched at least one existing path.
    pub present: Vec<String>,
}

impl ArtifactReport {
    /// Patterns with no match.
    #[must_use]
    pub fn missing(&self) -> Vec<&str> {
        self.required
            .iter()
            .filter(|p| !self.present.contains(p))
            .map(String::as_str)
            .collect()
    }

    /// True when every declared output exists.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.required.iter().all(|p| self.present.contains(p))
    }
}

/// Verifies a stage's outputs before its completion is trusted on resume.
///
/// Never consulted during forward execution.
pub trait ArtifactChecker: Send + Sync {
    /// Reports which of `stage`'s declared outputs exist under `target_dir`.
    fn check(&self, mode: &str, stage: &StageDefinition, target_dir: &Path) -> ArtifactReport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_output_conversions() {
        let output: ExecutorOutput = "done".into();
        assert_eq!(output.summary, "done");

        let output = ExecutorOutput::new("wrote prd").with_artifact("docs/prd.md");
        assert_eq!(output.artifacts, vec!["docs/prd.md".to_string()]);
    }

    #[test]
    fn test_artifact_report() {
        let report = ArtifactReport {
            stage: "prd".to_string(),
            required: vec!["docs/prd.md".to_string(), "docs/*.yaml".to_string()],
            present: vec!["docs/prd.md".to_string()],
        };
        assert!(!report.is_satisfied());
        assert_eq!(report.missing(), vec!["docs/*.yaml"]);

        let empty = ArtifactReport::default();
        assert!(empty.is_satisfied());
    }
}
