//! Wake-alarm collaborator contract
//!
//! The alarm database lives in another subsystem; the coordinator only asks
//! for the next scheduled wakeup and for the kernel-visible RTC alarm to be
//! armed before sleeping. Expiries are reported in wall-clock time.

use chrono::{DateTime, Utc};

/// The next scheduled wakeup as reported by the alarm service
#[derive(Debug, Clone)]
pub struct WakeAlarm {
    pub expires_at: DateTime<Utc>,
    pub app_id: String,
    pub key: String,
}

/// Provider of pending wake alarms
pub trait WakeAlarmSource: Send + Sync {
    /// The earliest pending wakeup, if any
    fn next_wakeup(&self) -> Option<WakeAlarm>;

    /// Arm the kernel RTC alarm for the reported expiry
    ///
    /// False means no alarm could be armed and the suspend attempt must be
    /// aborted.
    fn queue_next_wakeup(&self) -> bool;
}

/// Alarm source for platforms whose wakeups are managed elsewhere
///
/// Reports no pending alarms and arms trivially.
pub struct NoPendingAlarms;

impl WakeAlarmSource for NoPendingAlarms {
    fn next_wakeup(&self) -> Option<WakeAlarm> {
        None
    }

    fn queue_next_wakeup(&self) -> bool {
        true
    }
}
