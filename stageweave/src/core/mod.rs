//! Core domain model types for stageweave.
//!
//! - Stage and session status enums
//! - Static stage definitions
//! - Stage results, approval decisions and the session they belong to

mod approval;
mod definition;
mod result;
mod session;
mod status;

pub use approval::ApprovalDecision;
pub use definition::StageDefinition;
pub use result::StageResult;
pub use session::OrchestratorSession;
pub use status::{SessionStatus, StageStatus};
