//! Pipeline definition and execution.
//!
//! This module provides:
//! - Stage graph validation and the per-mode catalog
//! - Collaborator interfaces (stage executor, artifact checker, approvals)
//! - The stage runner with timeouts and retry backoff
//! - The round-based scheduler, its readiness planning and run aggregation

mod approval;
mod artifacts;
mod builder;
mod catalog;
mod dag;
mod interfaces;
mod readiness;
mod retry;
mod runner;
mod scheduler;
mod summary;


pub use approval::{
    ApprovalGate, ApprovalMode, ApprovalProvider, ChannelApprovalProvider, PendingApproval,
};
pub use artifacts::FsArtifactChecker;
pub use builder::{is_valid_stage_name, PipelineBuilder};
pub use catalog::PipelineCatalog;
pub use dag::StageGraph;
pub use interfaces::{ArtifactChecker, ArtifactReport, ExecutorOutput, StageContext, StageExecutor};
pub use readiness::{plan_round, RoundPlan};
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig};
pub use runner::StageRunner;
pub use scheduler::{PipelineResult, PipelineScheduler, Resume, SessionRequest};
pub use summary::{PipelineProgress, RunSummary};
