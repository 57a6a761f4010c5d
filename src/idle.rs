//! Idle evaluator
//!
//! A coalescing timer on the suspend loop. Each tick decides whether the
//! device may suspend — display, post-resume awake floor, activities, alarm
//! proximity, boot readiness — and either fires `IdleDetected` into the state
//! machine or just re-arms itself.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::activity::{ActivityRegistry, DURATION_UNBOUNDED};
use crate::alarm::WakeAlarmSource;
use crate::clock::{self, TimePoint};
use crate::config::SleepConfig;
use crate::events::{PowerEvent, PowerState};
use crate::signals::SystemSignals;
use crate::sysfs;

/// Floor for the evaluator's re-arm interval
pub const MIN_IDLE_SEC: u64 = 5;

pub struct IdleEvaluator {
    config: Arc<SleepConfig>,
    signals: Arc<SystemSignals>,
    activities: Arc<ActivityRegistry>,
    alarms: Arc<dyn WakeAlarmSource>,
    deadline: tokio::time::Instant,
}

impl IdleEvaluator {
    pub fn new(
        config: Arc<SleepConfig>,
        signals: Arc<SystemSignals>,
        activities: Arc<ActivityRegistry>,
        alarms: Arc<dyn WakeAlarmSource>,
    ) -> Self {
        let initial = config.wait_idle_ms;
        let mut evaluator = Self {
            config,
            signals,
            activities,
            alarms,
            deadline: tokio::time::Instant::now(),
        };
        evaluator.schedule(initial);
        evaluator
    }

    /// When the next tick is due
    pub fn deadline(&self) -> tokio::time::Instant {
        self.deadline
    }

    /// Arm the next tick `interval_ms` from now, coalesced to the configured
    /// granularity
    pub fn schedule(&mut self, interval_ms: u64) {
        let granularity = self.config.wait_idle_granularity_ms;
        let coalesced = interval_ms.div_ceil(granularity) * granularity;
        self.deadline = tokio::time::Instant::now() + Duration::from_millis(coalesced);
        debug!(in_ms = coalesced, "next idle check");
    }

    /// Run one idle check and re-arm
    ///
    /// Returns the event to feed the state machine, if the device is ready
    /// to suspend.
    pub fn tick(&mut self) -> Option<PowerEvent> {
        let state = self.signals.current_state();
        if state == PowerState::KernelResume {
            // a resume is pending to be processed; don't race it
            debug!("skipping idle check, resume pending");
            self.schedule(self.config.wait_idle_ms.max(MIN_IDLE_SEC * 1_000));
            return None;
        }
        debug!(state = %state, "idle check");

        let now = TimePoint::now();
        let mut next_idle_ms: u64 = 0;
        let mut fire = false;

        if self.signals.display_on() {
            debug!("display on, staying awake");
        } else {
            let floor = self
                .signals
                .last_wake()
                .add_ms(self.config.after_resume_idle_ms);
            if floor.is_greater(now) {
                // awake for less than the post-resume minimum
                next_idle_ms = floor.ms_since(now);
            } else {
                let idle = !self.activities.any_active(now);
                if !idle {
                    debug!("activity active, staying awake");
                }
                if self.activities.count_since(self.signals.last_wake()) > 0 {
                    self.activities.log_active_since(self.signals.last_wake());
                }
                self.activities.remove_expired(now);

                if !self.alarm_imminent() && self.ready_for_suspend() && idle {
                    fire = true;
                }
            }
        }

        let mut wait = self.config.wait_idle_ms;
        let max_activity = self.activities.max_remaining_ms(now);
        if max_activity != DURATION_UNBOUNDED {
            wait = wait.max(max_activity as u64);
        }
        wait = wait.max(next_idle_ms).max(MIN_IDLE_SEC * 1_000);
        self.schedule(wait);

        fire.then_some(PowerEvent::IdleDetected)
    }

    /// Whether the next wake alarm falls inside the do-not-suspend window
    fn alarm_imminent(&self) -> bool {
        let Some(alarm) = self.alarms.next_wakeup() else {
            return false;
        };
        let in_secs = (alarm.expires_at - clock::now_wall()).num_seconds();
        if in_secs >= 0 && in_secs <= self.config.wait_alarms_s as i64 {
            debug!(in_secs, key = %alarm.key, "alarm imminent, staying awake");
            return true;
        }
        false
    }

    /// Whether the boot-complete sentinel permits suspend activity
    fn ready_for_suspend(&self) -> bool {
        let ready = sysfs::readiness_present(&self.config.readiness_file);
        if !ready {
            debug!("suspend not yet permitted, readiness sentinel absent");
        }
        ready
    }
}
