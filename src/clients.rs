//! Client registry and vote collector
//!
//! Subscribed clients must individually ACK or NACK the two broadcast phases
//! of each suspend cycle. The registry answers the "all approved" and "who
//! hasn't responded" questions; the phase timeout itself is enforced by the
//! state machine, not per client.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{SleepError, SleepResult};
use crate::events::SuspendPhase;

/// A client's standing on one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientVote {
    #[default]
    Unset,
    Ack,
    Nack,
}

impl ClientVote {
    fn as_str(self) -> &'static str {
        match self {
            ClientVote::Unset => "-",
            ClientVote::Ack => "ack",
            ClientVote::Nack => "nack",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ClientRecord {
    suspend_request: ClientVote,
    prepare_suspend: ClientVote,
    last_nack_reason: Option<String>,
}

impl ClientRecord {
    fn vote(&self, phase: SuspendPhase) -> ClientVote {
        match phase {
            SuspendPhase::SuspendRequest => self.suspend_request,
            SuspendPhase::PrepareSuspend => self.prepare_suspend,
        }
    }

    fn vote_mut(&mut self, phase: SuspendPhase) -> &mut ClientVote {
        match phase {
            SuspendPhase::SuspendRequest => &mut self.suspend_request,
            SuspendPhase::PrepareSuspend => &mut self.prepare_suspend,
        }
    }
}

/// Log level for the diagnostic client table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLevel {
    Debug,
    Warn,
}

/// Registry of subscribed clients and their per-phase votes
pub struct ClientRegistry {
    inner: Mutex<HashMap<String, ClientRecord>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe a client; both votes start unset
    pub fn register(&self, id: &str) {
        let mut inner = self.inner.lock();
        if inner
            .insert(id.to_string(), ClientRecord::default())
            .is_some()
        {
            debug!(client = %id, "client re-subscribed, votes cleared");
        }
    }

    pub fn unregister(&self, id: &str) -> SleepResult<()> {
        match self.inner.lock().remove(id) {
            Some(_) => Ok(()),
            None => Err(SleepError::UnknownClient(id.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Record an ACK for the phase
    pub fn ack(&self, id: &str, phase: SuspendPhase) -> SleepResult<()> {
        let mut inner = self.inner.lock();
        let record = inner
            .get_mut(id)
            .ok_or_else(|| SleepError::UnknownClient(id.to_string()))?;
        *record.vote_mut(phase) = ClientVote::Ack;
        Ok(())
    }

    /// Record a NACK and its reason for the phase
    pub fn nack(&self, id: &str, phase: SuspendPhase, reason: Option<&str>) -> SleepResult<()> {
        let mut inner = self.inner.lock();
        let record = inner
            .get_mut(id)
            .ok_or_else(|| SleepError::UnknownClient(id.to_string()))?;
        *record.vote_mut(phase) = ClientVote::Nack;
        record.last_nack_reason = reason.map(str::to_string);
        Ok(())
    }

    /// Clear every client's votes at the start of a suspend cycle
    pub fn reset_votes(&self) {
        for record in self.inner.lock().values_mut() {
            record.suspend_request = ClientVote::Unset;
            record.prepare_suspend = ClientVote::Unset;
        }
    }

    /// True iff every known client has ACKed the phase
    ///
    /// Trivially true with no clients subscribed.
    pub fn all_approved(&self, phase: SuspendPhase) -> bool {
        self.inner
            .lock()
            .values()
            .all(|r| r.vote(phase) == ClientVote::Ack)
    }

    pub fn any_nacked(&self, phase: SuspendPhase) -> bool {
        self.inner
            .lock()
            .values()
            .any(|r| r.vote(phase) == ClientVote::Nack)
    }

    /// Clients whose vote for the phase is still unset
    pub fn non_responders(&self, phase: SuspendPhase) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .iter()
            .filter(|(_, r)| r.vote(phase) == ClientVote::Unset)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Emit the full vote table to the log
    pub fn print_table(&self, level: TableLevel) {
        let inner = self.inner.lock();
        for (id, record) in inner.iter() {
            match level {
                TableLevel::Debug => debug!(
                    client = %id,
                    suspend_request = record.suspend_request.as_str(),
                    prepare_suspend = record.prepare_suspend.as_str(),
                    nack_reason = record.last_nack_reason.as_deref().unwrap_or("-"),
                    "client vote"
                ),
                TableLevel::Warn => warn!(
                    client = %id,
                    suspend_request = record.suspend_request.as_str(),
                    prepare_suspend = record.prepare_suspend.as_str(),
                    nack_reason = record.last_nack_reason.as_deref().unwrap_or("-"),
                    "client vote"
                ),
            }
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const START_LOG_COUNT: u32 = 8;
const MAX_LOG_COUNT_INCREASE_RATE: u32 = 512;

/// Exponential rate limiter for NACK logging
///
/// Counts consecutive suspend cycles that ended back in `On` because of
/// NACKs. The full client table is logged when the count reaches 8, 16, 32,
/// ... 512, then every further 512. Reset whenever a cycle makes it past the
/// vetoing phase.
#[derive(Debug)]
pub struct NackRateCounter {
    successive: u32,
    threshold: u32,
}

impl NackRateCounter {
    pub fn new() -> Self {
        Self {
            successive: 0,
            threshold: START_LOG_COUNT,
        }
    }

    /// Count one more vetoed cycle; true when the table should be logged now
    pub fn bump(&mut self) -> bool {
        self.successive += 1;
        if self.successive < self.threshold {
            return false;
        }
        if self.threshold >= MAX_LOG_COUNT_INCREASE_RATE {
            self.threshold += MAX_LOG_COUNT_INCREASE_RATE;
        } else {
            self.threshold *= 2;
        }
        true
    }

    pub fn reset(&mut self) {
        self.successive = 0;
        self.threshold = START_LOG_COUNT;
    }

    pub fn successive(&self) -> u32 {
        self.successive
    }
}

impl Default for NackRateCounter {
    fn default() -> Self {
        Self::new()
    }
}
