//! Activity registry
//!
//! An activity is a named assertion that the device must stay awake. Bounded
//! activities carry a duration and expire on their own; open-ended ones last
//! until explicitly ended. On platforms without kernel wakelocks the registry
//! also provides the freeze/thaw mark that stands in for them around each
//! suspend attempt.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::TimePoint;

/// Sentinel returned by [`ActivityRegistry::max_remaining_ms`] when an
/// open-ended activity is present; the idle evaluator treats it as never-idle.
pub const DURATION_UNBOUNDED: u32 = u32::MAX;

/// A named wakefulness assertion
#[derive(Debug, Clone)]
pub struct Activity {
    pub name: String,
    pub started_at: TimePoint,
    /// `None` means open-ended
    pub duration_ms: Option<u32>,
    /// `started_at + duration_ms` when the duration is set
    pub expires_at: Option<TimePoint>,
}

impl Activity {
    fn new(name: String, started_at: TimePoint, duration_ms: Option<u32>) -> Self {
        let expires_at = duration_ms.map(|ms| started_at.add_ms(ms as u64));
        Self {
            name,
            started_at,
            duration_ms,
            expires_at,
        }
    }

    /// Whether the activity still holds the device awake at `now`
    pub fn is_active(&self, now: TimePoint) -> bool {
        match self.expires_at {
            Some(expiry) => expiry.is_greater(now),
            None => true,
        }
    }

    /// Whether the activity was active at any point since `t`
    fn active_since(&self, t: TimePoint) -> bool {
        match self.expires_at {
            Some(expiry) => expiry.is_greater(t),
            None => true,
        }
    }
}

/// Outcome of registering an activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityAdd {
    Started,
    /// An activity with this name existed; its expiry was refreshed
    Refreshed,
    /// The registry is frozen for a suspend attempt; registration refused
    Frozen,
}

struct Inner {
    activities: HashMap<String, Activity>,
    frozen: bool,
}

/// Registry of live activities, serialized behind a short critical section
/// so IPC callbacks on the main loop may post updates while the suspend loop
/// queries it.
pub struct ActivityRegistry {
    inner: Mutex<Inner>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                activities: HashMap::new(),
                frozen: false,
            }),
        }
    }

    /// Insert a new activity or refresh the expiry of an existing one
    pub fn add(&self, name: &str, duration_ms: Option<u32>) -> ActivityAdd {
        let mut inner = self.inner.lock();
        if inner.frozen {
            return ActivityAdd::Frozen;
        }
        let refreshed = inner.activities.contains_key(name);
        inner.activities.insert(
            name.to_string(),
            Activity::new(name.to_string(), TimePoint::now(), duration_ms),
        );
        if refreshed {
            ActivityAdd::Refreshed
        } else {
            ActivityAdd::Started
        }
    }

    /// End an activity by name; false if it was never registered
    pub fn remove(&self, name: &str) -> bool {
        self.inner.lock().activities.remove(name).is_some()
    }

    /// Whether any activity holds the device awake at `now`
    pub fn any_active(&self, now: TimePoint) -> bool {
        self.inner
            .lock()
            .activities
            .values()
            .any(|a| a.is_active(now))
    }

    /// Longest remaining duration of any bounded activity, in ms
    ///
    /// Returns [`DURATION_UNBOUNDED`] when an open-ended activity is active.
    pub fn max_remaining_ms(&self, now: TimePoint) -> u32 {
        let inner = self.inner.lock();
        let mut max = 0u32;
        for activity in inner.activities.values() {
            match activity.expires_at {
                None => return DURATION_UNBOUNDED,
                Some(expiry) if expiry.is_greater(now) => {
                    let remaining = expiry.ms_since(now).min(u32::MAX as u64) as u32;
                    max = max.max(remaining);
                }
                Some(_) => {}
            }
        }
        max
    }

    /// Drop every activity whose expiry has passed
    pub fn remove_expired(&self, now: TimePoint) {
        let mut inner = self.inner.lock();
        inner.activities.retain(|name, activity| {
            let keep = activity.is_active(now);
            if !keep {
                debug!(activity = %name, "activity expired");
            }
            keep
        });
    }

    /// Activities that were active at any point since `t`, for diagnostics
    pub fn list_active_since(&self, t: TimePoint) -> Vec<Activity> {
        self.inner
            .lock()
            .activities
            .values()
            .filter(|a| a.active_since(t))
            .cloned()
            .collect()
    }

    pub fn count_since(&self, t: TimePoint) -> usize {
        self.inner
            .lock()
            .activities
            .values()
            .filter(|a| a.active_since(t))
            .count()
    }

    /// Log every activity active since `t` at debug level
    pub fn log_active_since(&self, t: TimePoint) {
        for activity in self.list_active_since(t) {
            debug!(
                activity = %activity.name,
                duration_ms = ?activity.duration_ms,
                "active since wake"
            );
        }
    }

    /// Atomically freeze the registry for a suspend attempt
    ///
    /// Succeeds (and marks the registry frozen) only if nothing is active at
    /// `now`; otherwise the registry is left unfrozen. Every freeze that
    /// returns true must be paired with exactly one [`thaw`](Self::thaw) on
    /// the way out of the suspend attempt.
    pub fn freeze(&self, now: TimePoint) -> bool {
        let mut inner = self.inner.lock();
        if inner.activities.values().any(|a| a.is_active(now)) {
            return false;
        }
        inner.frozen = true;
        true
    }

    /// Lift the freeze mark
    pub fn thaw(&self) {
        self.inner.lock().frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.lock().frozen
    }
}

impl Default for ActivityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
