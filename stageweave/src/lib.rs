//! # Stageweave
//!
//! A resumable stage pipeline scheduler with a crash-safe shared state store.
//!
//! Stageweave runs a DAG of named stages for a pipeline mode:
//!
//! - **Round-based scheduling**: ready stages run each round, parallel ones
//!   concurrently; failures cascade to dependents as skips
//! - **Retries and deadlines**: every stage attempt has a timeout and failed
//!   attempts back off exponentially
//! - **Approval gates**: auto, manual, critical or custom policies before
//!   gated stages
//! - **Resumable sessions**: sessions persist after every round and can be
//!   resumed, trusting earlier stages only when their outputs still exist
//! - **Shared state**: stages exchange documents through an atomic store
//!   guarded by lease-based file locks that survive crashed holders
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stageweave::prelude::*;
//!
//! let catalog = PipelineCatalog::from_yaml_file(Path::new("pipelines.yaml"))?;
//! let scheduler = PipelineScheduler::new(OrchestratorConfig::default(), catalog, executor)?;
//!
//! let mut session = scheduler.start_session(SessionRequest::new("./project", "greenfield"))?;
//! let result = scheduler
//!     .execute_pipeline(&mut session, &CancellationToken::new())
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ConfigOverrides, LockConfig, OrchestratorConfig};
    pub use crate::core::{
        ApprovalDecision, OrchestratorSession, SessionStatus, StageDefinition, StageResult,
        StageStatus,
    };
    pub use crate::errors::{
        LockError, PipelineValidationError, SessionError, StageweaveError, StoreError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        ApprovalMode, ApprovalProvider, ExecutorOutput, PipelineCatalog, PipelineResult,
        PipelineScheduler, Resume, SessionRequest, StageContext, StageExecutor,
    };
    pub use crate::store::{AtomicStore, LockManager, SessionStore, SharedStateStore};
}
