//! Cooperative cancellation for pipeline runs.
//!
//! The scheduler checks a session-scoped [`CancellationToken`] at the top of
//! each readiness round. Stage attempts already in flight are never
//! interrupted; cancellation only stops new stages from starting.

mod token;

pub use token::CancellationToken;
