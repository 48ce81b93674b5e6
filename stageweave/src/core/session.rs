//! Pipeline session state.

use super::{ApprovalDecision, SessionStatus, StageResult, StageStatus};
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// One end-to-end pipeline run, or a resumable continuation of one.
///
/// The scheduler owns the session exclusively while a run is in progress;
/// concurrent stage tasks hand their results back through a join point and
/// never touch the session directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSession {
    /// Unique session id.
    pub session_id: String,
    /// Directory the pipeline works on.
    pub target_dir: PathBuf,
    /// Mode selecting the stage definition set.
    pub mode: String,
    /// When the session was created.
    pub started_at: Timestamp,
    /// When the last run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Overall status.
    pub status: SessionStatus,
    /// Root of the shared state store.
    pub store_root: PathBuf,
    /// Session this one continues, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,
    /// Stages treated as already satisfied.
    #[serde(default)]
    pub pre_completed_stages: BTreeSet<String>,
    /// Ordered stage results, append-only.
    #[serde(rename = "stages")]
    stage_results: Vec<StageResult>,
    /// Approval gate decisions made during runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvals: Vec<ApprovalDecision>,
}

impl OrchestratorSession {
    /// Creates a pending session.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        target_dir: impl Into<PathBuf>,
        mode: impl Into<String>,
        store_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            target_dir: target_dir.into(),
            mode: mode.into(),
            started_at: now_utc(),
            finished_at: None,
            status: SessionStatus::Pending,
            store_root: store_root.into(),
            resumed_from: None,
            pre_completed_stages: BTreeSet::new(),
            stage_results: Vec::new(),
            approvals: Vec::new(),
        }
    }

    /// Returns the recorded results in order.
    #[must_use]
    pub fn results(&self) -> &[StageResult] {
        &self.stage_results
    }

    /// Appends a terminal result.
    ///
    /// Non-terminal results are ignored: only finished stages are recorded.
    pub fn push_result(&mut self, result: StageResult) {
        if result.status.is_terminal() {
            self.stage_results.push(result);
        } else {
            tracing::warn!(
                stage = %result.name,
                status = %result.status,
                "Ignoring non-terminal stage result"
            );
        }
    }

    /// Returns the most recent result recorded for a stage.
    #[must_use]
    pub fn latest_result(&self, stage: &str) -> Option<&StageResult> {
        self.stage_results.iter().rev().find(|r| r.name == stage)
    }

    /// Returns the names of stages whose latest result is `completed`.
    #[must_use]
    pub fn completed_stages(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for result in &self.stage_results {
            if result.status == StageStatus::Completed {
                names.insert(result.name.clone());
            } else {
                names.remove(&result.name);
            }
        }
        names
    }

    /// Returns true if the stage is pre-completed or completed in this session.
    #[must_use]
    pub fn is_satisfied(&self, stage: &str) -> bool {
        self.pre_completed_stages.contains(stage)
            || self
                .latest_result(stage)
                .is_some_and(StageResult::is_completed)
    }

    /// Counts results with the given status.
    #[must_use]
    pub fn count(&self, status: StageStatus) -> usize {
        self.stage_results.iter().filter(|r| r.status == status).count()
    }

    /// Returns every artifact path produced in this session.
    #[must_use]
    pub fn artifacts(&self) -> Vec<String> {
        self.stage_results
            .iter()
            .flat_map(|r| r.artifacts.iter().cloned())
            .collect()
    }
}
