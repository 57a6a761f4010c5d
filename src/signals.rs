//! Global signals shared between the IPC loop and the suspend loop
//!
//! Each signal has a single designated writer: `display_on` is written by the
//! display-status decoder, the charger fields by the charger-status decoder,
//! the state and time stamps by the suspend loop. Readers see eventual
//! consistency through atomic loads; the time stamps sit behind a short mutex.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::{self, TimePoint};
use crate::events::PowerState;

/// Monotonic and wall-clock stamps around a suspend cycle
#[derive(Debug, Clone, Copy)]
pub struct WakeStamps {
    /// When the device last finished resuming
    pub last_wake: TimePoint,
    /// When the current/last suspend cycle started (entry to phase 1)
    pub suspend_start: TimePoint,
    /// When the suspended broadcast went out
    pub suspended_at: TimePoint,
    /// Wall clock at suspend, for sleep-duration instrumentation
    pub suspend_rtc: DateTime<Utc>,
    /// Wall clock at wake
    pub wake_rtc: DateTime<Utc>,
}

/// Shared signal block
pub struct SystemSignals {
    display_on: AtomicBool,
    charger_connected: AtomicBool,
    usb_connected: AtomicBool,
    dock_power: AtomicBool,
    state: AtomicU8,
    stamps: Mutex<WakeStamps>,
}

impl SystemSignals {
    pub fn new() -> Self {
        let now = TimePoint::now();
        let wall = clock::now_wall();
        Self {
            // displays start on at boot
            display_on: AtomicBool::new(true),
            charger_connected: AtomicBool::new(false),
            usb_connected: AtomicBool::new(false),
            dock_power: AtomicBool::new(false),
            state: AtomicU8::new(PowerState::On as u8),
            stamps: Mutex::new(WakeStamps {
                last_wake: now,
                suspend_start: now,
                suspended_at: now,
                suspend_rtc: wall,
                wake_rtc: wall,
            }),
        }
    }

    pub fn display_on(&self) -> bool {
        self.display_on.load(Ordering::Relaxed)
    }

    /// Writer: display-status decoder only
    pub fn set_display_on(&self, on: bool) {
        self.display_on.store(on, Ordering::Relaxed);
    }

    pub fn charger_connected(&self) -> bool {
        self.charger_connected.load(Ordering::Relaxed)
    }

    /// Writer: charger-status decoder only
    ///
    /// Stores the two inputs and derives `charger_connected` as their
    /// logical OR. Returns the derived value.
    pub fn set_charger(&self, usb: bool, dock: bool) -> bool {
        self.usb_connected.store(usb, Ordering::Relaxed);
        self.dock_power.store(dock, Ordering::Relaxed);
        let connected = usb || dock;
        self.charger_connected.store(connected, Ordering::Relaxed);
        connected
    }

    pub fn usb_connected(&self) -> bool {
        self.usb_connected.load(Ordering::Relaxed)
    }

    pub fn dock_power(&self) -> bool {
        self.dock_power.load(Ordering::Relaxed)
    }

    pub fn current_state(&self) -> PowerState {
        PowerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Writer: suspend loop only
    pub fn set_state(&self, state: PowerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether the device is in its post-sleep window, before the resume
    /// broadcast has gone out
    ///
    /// True only while the machine sits in `KernelResume`; during `Sleep`
    /// itself the process is frozen, so callers can never observe it.
    pub fn is_suspended(&self) -> bool {
        self.current_state() == PowerState::KernelResume
    }

    pub fn stamps(&self) -> WakeStamps {
        *self.stamps.lock()
    }

    pub fn last_wake(&self) -> TimePoint {
        self.stamps.lock().last_wake
    }

    /// Writer: suspend loop only
    pub fn record_suspend_start(&self, at: TimePoint) {
        self.stamps.lock().suspend_start = at;
    }

    /// Writer: suspend loop only
    pub fn record_suspended(&self, at: TimePoint, rtc: DateTime<Utc>) {
        let mut stamps = self.stamps.lock();
        stamps.suspended_at = at;
        stamps.suspend_rtc = rtc;
    }

    /// Writer: suspend loop only
    pub fn record_wake(&self, at: TimePoint, rtc: DateTime<Utc>) {
        let mut stamps = self.stamps.lock();
        stamps.last_wake = at;
        stamps.wake_rtc = rtc;
    }
}

impl Default for SystemSignals {
    fn default() -> Self {
        Self::new()
    }
}
