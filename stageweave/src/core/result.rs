//! Per-stage execution results.

use super::StageStatus;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// The recorded outcome of one stage in one session.
///
/// A result is appended to its session once it reaches a terminal status and
/// is never mutated afterwards; a later run records a new result instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage name.
    pub name: String,
    /// The executor kind the stage was dispatched to.
    pub executor_kind: String,
    /// The terminal status.
    pub status: StageStatus,
    /// Wall time spent across all attempts, in milliseconds.
    #[serde(default)]
    pub duration_ms: f64,
    /// Summary produced by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Paths of artifacts the stage produced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// Last error message for failed stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the stage was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Retries consumed on success, attempts made on failure.
    #[serde(default)]
    pub retry_count: usize,
    /// When the result was recorded.
    pub recorded_at: Timestamp,
}

impl StageResult {
    fn base(name: &str, executor_kind: &str, status: StageStatus) -> Self {
        Self {
            name: name.to_string(),
            executor_kind: executor_kind.to_string(),
            status,
            duration_ms: 0.0,
            output: None,
            artifacts: Vec::new(),
            error: None,
            skip_reason: None,
            retry_count: 0,
            recorded_at: now_utc(),
        }
    }

    /// Creates a completed result.
    #[must_use]
    pub fn completed(
        name: &str,
        executor_kind: &str,
        output: impl Into<String>,
        artifacts: Vec<String>,
    ) -> Self {
        Self {
            output: Some(output.into()),
            artifacts,
            ..Self::base(name, executor_kind, StageStatus::Completed)
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(name: &str, executor_kind: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::base(name, executor_kind, StageStatus::Failed)
        }
    }

    /// Creates a skipped result.
    #[must_use]
    pub fn skipped(name: &str, executor_kind: &str, reason: impl Into<String>) -> Self {
        Self {
            skip_reason: Some(reason.into()),
            ..Self::base(name, executor_kind, StageStatus::Skipped)
        }
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Returns true if the stage completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_result() {
        let result = StageResult::completed("prd", "writer", "wrote prd", vec!["docs/prd.md".into()])
            .with_duration_ms(12.5)
            .with_retry_count(1);

        assert!(result.is_completed());
        assert_eq!(result.output.as_deref(), Some("wrote prd"));
        assert_eq!(result.retry_count, 1);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_skipped_result_carries_reason() {
        let result = StageResult::skipped("sds", "architect", "dependency 'srs' failed");

        assert_eq!(result.status, StageStatus::Skipped);
        assert!(result.skip_reason.unwrap().contains("srs"));
    }

    #[test]
    fn test_serialization_omits_empty_fields() {
        let result = StageResult::failed("prd", "writer", "boom");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "failed");
        assert!(json.get("artifacts").is_none());
        assert!(json.get("skip_reason").is_none());
    }
}
