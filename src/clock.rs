//! Monotonic and wall-clock time service
//!
//! All scheduling runs on the monotonic clock; wall-clock reads are used only
//! for sleep-duration instrumentation and for comparing against wake-alarm
//! expiries, which the alarm service reports in wall-clock time.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// A point on the monotonic clock
///
/// Wraps the runtime clock so that paused-time tests observe virtual time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimePoint(tokio::time::Instant);

impl TimePoint {
    /// Read the monotonic clock
    pub fn now() -> Self {
        Self(tokio::time::Instant::now())
    }

    /// This point shifted forward by `ms` milliseconds
    pub fn add_ms(self, ms: u64) -> Self {
        Self(self.0 + Duration::from_millis(ms))
    }

    /// Strict-greater comparison
    pub fn is_greater(self, other: TimePoint) -> bool {
        self.0 > other.0
    }

    /// Milliseconds from `earlier` to `self`, zero if `earlier` is ahead
    pub fn ms_since(self, earlier: TimePoint) -> u64 {
        self.0.saturating_duration_since(earlier.0).as_millis() as u64
    }

    /// Duration from `earlier` to `self`, zero if `earlier` is ahead
    pub fn diff(self, earlier: TimePoint) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

/// Read the wall clock
pub fn now_wall() -> DateTime<Utc> {
    Utc::now()
}

/// Human-readable rendering of a duration for log records
///
/// Largest units first, sub-second precision kept on the seconds field:
/// `2d 3h 10m 4.250s`.
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let mins = (total_secs % 3_600) / 60;
    let secs = total_secs % 60;
    let millis = d.subsec_millis();

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}d ", days));
    }
    if hours > 0 || days > 0 {
        out.push_str(&format!("{}h ", hours));
    }
    if mins > 0 || hours > 0 || days > 0 {
        out.push_str(&format!("{}m ", mins));
    }
    out.push_str(&format!("{}.{:03}s", secs, millis));
    out
}
