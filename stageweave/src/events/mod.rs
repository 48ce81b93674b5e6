//! Pipeline lifecycle events.
//!
//! The scheduler reports progress through an injected [`EventSink`]. Event
//! types are dotted names; payloads are JSON objects carrying at least the
//! session id.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run began executing.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// A run finished and its session was saved.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A stage attempt is about to start.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage attempt failed and another will follow.
pub const STAGE_RETRYING: &str = "stage.retrying";
/// A stage completed.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage failed after exhausting its retries.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage was skipped.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// An approval gate produced a decision.
pub const APPROVAL_DECIDED: &str = "approval.decided";
