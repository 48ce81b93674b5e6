//! File-backed shared state: atomic documents, locks and sessions.
//!
//! [`AtomicStore`] provides crash-safe primitives under a single root,
//! [`LockManager`] coordinates writers across processes, and
//! [`SessionStore`] persists pipeline runs so they can be resumed.

mod atomic;
mod lock;
mod records;
mod session_store;

pub use atomic::{AtomicStore, PreparedWrite, RecordFormat, WriteOptions};
pub use lock::{FileLock, LockGuard, LockManager, LockState, ReleaseRequest, UNKNOWN_HOLDER};
pub use records::{RecordValidator, SharedStateStore};
pub use session_store::{SessionStore, SESSIONS_DIR};
