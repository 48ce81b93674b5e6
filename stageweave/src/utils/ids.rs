//! Identifier generation for sessions and lock holders.

use uuid::Uuid;

/// Generates a time-ordered session id (`session-<uuidv7>`).
#[must_use]
pub fn generate_session_id() -> String {
    format!("session-{}", Uuid::now_v7())
}

/// Generates a lock holder id unique to this process and caller.
///
/// The process id makes holders from different processes easy to tell
/// apart in lock files; the random suffix separates holders in one process.
#[must_use]
pub fn generate_holder_id(label: &str) -> String {
    format!("{label}:{}:{}", std::process::id(), Uuid::new_v4().simple())
}
