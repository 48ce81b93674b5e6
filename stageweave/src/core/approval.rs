//! Approval decision records.

use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// The outcome of consulting an approval gate for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// The gated stage.
    pub stage: String,
    /// Whether the stage may run.
    pub approved: bool,
    /// Human-readable reason.
    pub reason: String,
    /// Who or what decided.
    pub decided_by: String,
    /// When the decision was made.
    pub decided_at: Timestamp,
}

impl ApprovalDecision {
    /// Creates an approval.
    #[must_use]
    pub fn approve(
        stage: impl Into<String>,
        decided_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            approved: true,
            reason: reason.into(),
            decided_by: decided_by.into(),
            decided_at: now_utc(),
        }
    }

    /// Creates a denial.
    #[must_use]
    pub fn deny(
        stage: impl Into<String>,
        decided_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            approved: false,
            ..Self::approve(stage, decided_by, reason)
        }
    }
}
