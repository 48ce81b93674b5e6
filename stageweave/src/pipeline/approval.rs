//! Approval gates consulted before stages flagged `approval_required`.
//!
//! A denial is a control decision: the scheduler records the stage as
//! `skipped` with the denial reason rather than as `failed`.

use crate::core::{ApprovalDecision, StageDefinition, StageResult, StageStatus};
use crate::utils::{now_utc, Timestamp};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How approval gates decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Always proceed.
    #[default]
    Auto,
    /// Ask the configured provider; auto-approve when there is none.
    Manual,
    /// Deny once any stage in the run has failed.
    Critical,
    /// Delegate to the configured provider; deny when there is none.
    Custom,
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Critical => "critical",
            Self::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

/// Makes approval decisions for gated stages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApprovalProvider: Send + Sync {
    /// Decides whether `stage` may run, given the results of this run so far.
    async fn decide(&self, stage: &str, prior_results: &[StageResult]) -> ApprovalDecision;
}

/// Applies an [`ApprovalMode`] with an optional provider.
#[derive(Clone, Default)]
pub struct ApprovalGate {
    mode: ApprovalMode,
    provider: Option<Arc<dyn ApprovalProvider>>,
}

impl fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("mode", &self.mode)
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

impl ApprovalGate {
    /// Creates a gate without a provider.
    #[must_use]
    pub fn new(mode: ApprovalMode) -> Self {
        Self {
            mode,
            provider: None,
        }
    }

    /// Sets the provider used by `manual` and `custom` modes.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ApprovalProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Returns the mode.
    #[must_use]
    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Decides whether `stage` may run.
    ///
    /// `run_results` holds the results recorded so far in the current run.
    pub async fn evaluate(
        &self,
        stage: &StageDefinition,
        run_results: &[StageResult],
    ) -> ApprovalDecision {
        let decision = match (self.mode, &self.provider) {
            (ApprovalMode::Auto, _) => {
                ApprovalDecision::approve(&stage.name, "auto", "Approval mode is auto")
            }
            (ApprovalMode::Manual, Some(provider)) => provider.decide(&stage.name, run_results).await,
            (ApprovalMode::Manual, None) => ApprovalDecision::approve(
                &stage.name,
                "auto",
                "Manual approval requested but no interactive channel is available; auto-approved",
            ),
            (ApprovalMode::Critical, _) => {
                match run_results.iter().find(|r| r.status == StageStatus::Failed) {
                    Some(failed) => ApprovalDecision::deny(
                        &stage.name,
                        "critical",
                        format!("Stage '{}' failed earlier in this run", failed.name),
                    ),
                    None => ApprovalDecision::approve(
                        &stage.name,
                        "critical",
                        "No failures in this run",
                    ),
                }
            }
            (ApprovalMode::Custom, Some(provider)) => provider.decide(&stage.name, run_results).await,
            (ApprovalMode::Custom, None) => ApprovalDecision::deny(
                &stage.name,
                "custom",
                "Custom approval mode has no provider configured",
            ),
        };

        debug!(
            stage = %stage.name,
            mode = %self.mode,
            approved = decision.approved,
            decided_by = %decision.decided_by,
            "Approval gate decided"
        );
        decision
    }
}

/// A pending request in a [`ChannelApprovalProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    /// Request id to answer with.
    pub id: Uuid,
    /// The gated stage.
    pub stage: String,
    /// When the request was registered.
    pub requested_at: Timestamp,
}

struct Waiting {
    info: PendingApproval,
    reply: oneshot::Sender<ApprovalDecision>,
}

/// Interactive approvals answered from another task.
///
/// Each gated stage registers a pending request and waits for
/// [`Self::approve`] or [`Self::deny`]. A request nobody answers within the
/// timeout is denied.
pub struct ChannelApprovalProvider {
    timeout: Duration,
    pending: RwLock<HashMap<Uuid, Waiting>>,
}

impl fmt::Debug for ChannelApprovalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelApprovalProvider")
            .field("timeout", &self.timeout)
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

impl ChannelApprovalProvider {
    /// Creates a provider that denies requests unanswered after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Lists pending requests, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingApproval> {
        let mut pending: Vec<PendingApproval> =
            self.pending.read().values().map(|w| w.info.clone()).collect();
        pending.sort_by_key(|p| p.requested_at);
        pending
    }

    /// Number of pending requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Approves a pending request. Returns false if it is no longer pending.
    pub fn approve(&self, id: Uuid, decided_by: &str, reason: &str) -> bool {
        self.answer(id, |stage| ApprovalDecision::approve(stage, decided_by, reason))
    }

    /// Denies a pending request. Returns false if it is no longer pending.
    pub fn deny(&self, id: Uuid, decided_by: &str, reason: &str) -> bool {
        self.answer(id, |stage| ApprovalDecision::deny(stage, decided_by, reason))
    }

    fn answer(&self, id: Uuid, make: impl FnOnce(&str) -> ApprovalDecision) -> bool {
        let Some(waiting) = self.pending.write().remove(&id) else {
            return false;
        };
        let decision = make(&waiting.info.stage);
        info!(stage = %waiting.info.stage, approved = decision.approved, "Approval answered");
        waiting.reply.send(decision).is_ok()
    }
}

#[async_trait]
impl ApprovalProvider for ChannelApprovalProvider {
    async fn decide(&self, stage: &str, _prior_results: &[StageResult]) -> ApprovalDecision {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.write().insert(
            id,
            Waiting {
                info: PendingApproval {
                    id,
                    stage: stage.to_string(),
                    requested_at: now_utc(),
                },
                reply: tx,
            },
        );
        info!(stage, request_id = %id, "Waiting for approval");

        let outcome = tokio::time::timeout(self.timeout, rx).await;
        self.pending.write().remove(&id);

        match outcome {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => ApprovalDecision::deny(stage, "channel", "Approval channel closed"),
            Err(_) => {
                warn!(stage, request_id = %id, "Approval timed out");
                ApprovalDecision::deny(
                    stage,
                    "channel",
                    format!("No decision within {}ms", self.timeout.as_millis()),
                )
            }
        }
    }
}
