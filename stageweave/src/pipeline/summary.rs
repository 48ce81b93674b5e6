//! Run aggregation and progress reporting.

use crate::core::{SessionStatus, StageResult, StageStatus};
use serde::{Deserialize, Serialize};

/// Outcome counts for one run and the status they aggregate to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Aggregated status.
    pub status: SessionStatus,
    /// Stages that completed.
    pub completed: usize,
    /// Stages that failed.
    pub failed: usize,
    /// Stages that were skipped.
    pub skipped: usize,
    /// Set for `partial` runs.
    pub warning: Option<String>,
}

impl RunSummary {
    /// Aggregates the results recorded in one run.
    ///
    /// `completed` when nothing failed or was skipped (including a run with
    /// nothing to do), `failed` when nothing completed, `partial` otherwise.
    #[must_use]
    pub fn from_results(results: &[StageResult]) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        let completed = count(StageStatus::Completed);
        let failed = count(StageStatus::Failed);
        let skipped = count(StageStatus::Skipped);

        let status = if failed == 0 && skipped == 0 {
            SessionStatus::Completed
        } else if completed == 0 {
            SessionStatus::Failed
        } else {
            SessionStatus::Partial
        };

        let warning = (status == SessionStatus::Partial)
            .then(|| format!("{failed} failed, {completed} completed, {skipped} skipped"));

        Self {
            status,
            completed,
            failed,
            skipped,
            warning,
        }
    }

    /// Total number of results aggregated.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    /// Fraction of stages that completed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => self.completed as f64 / total as f64,
        }
    }
}

/// Progress of a session against its mode's stage graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineProgress {
    /// The session reported on.
    pub session_id: String,
    /// The session's mode.
    pub mode: String,
    /// The session's status.
    pub status: SessionStatus,
    /// Stages in the mode.
    pub total: usize,
    /// Stages whose latest result is completed, or that were pre-completed.
    pub completed: usize,
    /// Stages whose latest result is failed.
    pub failed: usize,
    /// Stages whose latest result is skipped.
    pub skipped: usize,
    /// Stages with no result yet, in execution order.
    pub pending: Vec<String>,
    /// Share of stages with a terminal outcome, from 0 to 100.
    pub percent_complete: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn completed(name: &str) -> StageResult {
        StageResult::completed(name, "k", "ok", Vec::new())
    }

    #[test]
    fn test_all_completed() {
        let summary = RunSummary::from_results(&[completed("a"), completed("b")]);
        assert_eq!(summary.status, SessionStatus::Completed);
        assert!(summary.warning.is_none());
    }

    #[test]
    fn test_empty_run_is_completed() {
        let summary = RunSummary::from_results(&[]);
        assert_eq!(summary.status, SessionStatus::Completed);
        assert!((summary.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_warning() {
        let summary = RunSummary::from_results(&[completed("a"), StageResult::failed("b", "k", "boom")]);
        assert_eq!(summary.status, SessionStatus::Partial);
        assert_eq!(summary.warning.as_deref(), Some("1 failed, 1 completed, 0 skipped"));
    }

    #[test]
    fn test_completed_with_skips_is_partial() {
        let summary = RunSummary::from_results(&[
            completed("a"),
            StageResult::skipped("b", "k", "denied"),
        ]);
        assert_eq!(summary.status, SessionStatus::Partial);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_nothing_completed_is_failed() {
        let summary = RunSummary::from_results(&[
            StageResult::failed("a", "k", "boom"),
            StageResult::skipped("b", "k", "dependency"),
        ]);
        assert_eq!(summary.status, SessionStatus::Failed);

        let all_skipped = RunSummary::from_results(&[StageResult::skipped("a", "k", "cancelled")]);
        assert_eq!(all_skipped.status, SessionStatus::Failed);
    }
}
