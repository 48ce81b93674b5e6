//! Error types for stageweave.
//!
//! The taxonomy separates fatal configuration problems (a malformed stage
//! graph, an unknown mode) from recoverable runtime conditions (lock
//! contention, missing sessions). Stage execution failures never appear
//! here: they are recorded as `failed` stage results instead.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// The umbrella error returned by scheduler entry points.
#[derive(Debug, Error)]
pub enum StageweaveError {
    /// The stage graph or pipeline mode is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// Configuration could not be loaded or is inconsistent.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A lock operation failed.
    #[error("{0}")]
    Lock(#[from] LockError),

    /// A session could not be loaded or saved.
    #[error("{0}")]
    Session(#[from] SessionError),
}

/// Machine-readable details attached to validation errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "DAG-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Error raised when a stage graph or mode fails validation.
///
/// Always fatal and always raised before any stage executes.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional structured details.
    pub error_info: Option<ErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the structured details.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// Error for a mode that has no stage definitions.
    #[must_use]
    pub fn unknown_mode(mode: &str) -> Self {
        Self::new(format!("Unsupported pipeline mode '{mode}'")).with_error_info(
            ErrorInfo::new("MODE-UNKNOWN", format!("No stage definitions for mode '{mode}'"))
                .with_fix_hint("Declare the mode in the pipeline catalog."),
        )
    }

    /// Error for a stage name that is not part of a mode.
    #[must_use]
    pub fn unknown_stage(mode: &str, stage: &str) -> Self {
        Self::new(format!("Stage '{stage}' is not defined in mode '{mode}'"))
            .with_stages(vec![stage.to_string()])
            .with_error_info(ErrorInfo::new(
                "STAGE-UNKNOWN",
                format!("Unknown stage '{stage}'"),
            ))
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        let summary = format!(
            "Stage graph contains a dependency cycle: {}",
            err.cycle_path.join(" -> ")
        );
        Self {
            message: err.to_string(),
            stages: err.cycle_path,
            error_info: Some(
                ErrorInfo::new("DAG-CYCLE", summary)
                    .with_fix_hint("Remove one of the dependencies in the cycle to break it."),
            ),
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// The config path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field holds an invalid value.
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        /// The offending field.
        field: String,
        /// Why it is invalid.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the atomic store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A path resolved outside the store root.
    #[error("Path '{path}' escapes store root '{root}'")]
    PathEscape {
        /// The requested path.
        path: PathBuf,
        /// The store root.
        root: PathBuf,
    },

    /// An IO operation failed.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A record could not be encoded or decoded.
    #[error("Serialization error on {path}: {message}")]
    Serialization {
        /// The record path.
        path: PathBuf,
        /// The codec message.
        message: String,
    },

    /// A record failed collaborator schema validation.
    #[error("Record {path} failed validation: {message}")]
    Validation {
        /// The record path.
        path: PathBuf,
        /// The validator message.
        message: String,
    },
}

impl StoreError {
    /// Wraps an IO error with the path it occurred on.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Serialization {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Errors raised by the lock manager.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock could not be acquired within the retry budget.
    #[error("Lock contention on {path}: gave up after {attempts} attempts")]
    Contention {
        /// The locked document path.
        path: PathBuf,
        /// Number of attempts made.
        attempts: usize,
    },

    /// The caller does not hold the lock it tried to release or extend.
    #[error("Lock on {path} is not held by {expected}: current holder is {actual}")]
    NotHolder {
        /// The locked document path.
        path: PathBuf,
        /// The caller's holder id and generation.
        expected: String,
        /// The current holder id and generation, or "nobody".
        actual: String,
    },

    /// The underlying store failed.
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No record exists for the session id.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// A record exists but is missing required fields or is malformed.
    #[error("Session {session_id} is corrupted: {reason}")]
    Corrupted {
        /// The session id.
        session_id: String,
        /// What was wrong with the record.
        reason: String,
    },

    /// The underlying store failed.
    #[error("{0}")]
    Store(#[from] StoreError),
}
