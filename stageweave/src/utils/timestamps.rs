//! Timestamp helpers shared by lock leases and session records.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Adds a std duration to a timestamp, saturating at the chrono maximum.
#[must_use]
pub fn add_duration(ts: Timestamp, duration: Duration) -> Timestamp {
    ChronoDuration::from_std(duration)
        .ok()
        .and_then(|d| ts.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Converts a std duration to fractional milliseconds.
#[must_use]
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
