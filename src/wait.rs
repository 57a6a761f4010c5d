//! Bounded-wait gate used for phase waiting
//!
//! The suspend loop arms a gate before broadcasting a phase, then waits on it
//! with the phase timeout. The IPC loop signals the gate when the collected
//! votes decide the phase early. The gate reports only signal-or-timeout; the
//! state machine derives the actual outcome from the vote registry, so the
//! wait primitive stays independent of the state it serves.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// How a bounded wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

struct GateInner {
    signaled: Mutex<bool>,
    notify: Notify,
}

/// A resettable signal-or-timeout gate
///
/// Cloning shares the gate; any clone may arm, signal, or wait.
#[derive(Clone)]
pub struct PhaseGate {
    inner: Arc<GateInner>,
}

impl PhaseGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                signaled: Mutex::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Clear any previous signal; call before the broadcast that opens the
    /// window so a racing signal is never lost
    pub fn arm(&self) {
        *self.inner.signaled.lock() = false;
    }

    /// Release the current (or next) waiter
    pub fn signal(&self) {
        *self.inner.signaled.lock() = true;
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    /// Wait until signaled or until `timeout` elapses
    pub async fn wait(&self, timeout: Duration) -> WaitResult {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // create the future before checking the flag so a signal landing
            // in between is still observed
            let notified = self.inner.notify.notified();
            if *self.inner.signaled.lock() {
                return WaitResult::Signaled;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return WaitResult::TimedOut;
            }
        }
    }
}

impl Default for PhaseGate {
    fn default() -> Self {
        Self::new()
    }
}
