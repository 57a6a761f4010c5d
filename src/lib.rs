//! Suspend/resume coordinator for a power-management daemon
//!
//! This crate decides when a mobile or embedded device may transition from
//! fully awake into kernel-level suspend, coordinates the transition with
//! subscribing clients that may veto it, invokes the platform suspend
//! primitive, and broadcasts resume on wake. The core is a cyclic
//! eight-state machine coupled to an idle scheduler and a two-phase
//! client-vote protocol:
//! - an idle evaluator integrates display state, charger state, activity
//!   wakelocks, pending wake alarms, and a post-resume awake floor
//! - two broadcast phases (`SuspendRequest`, `PrepareSuspend`) collect
//!   per-client ACK/NACK votes under bounded waits
//! - the platform suspend call runs only after a final activity re-check
//!
//! Two loops, one process: the IPC loop decodes bus traffic into registry
//! mutations and events; the suspend loop owns the state machine and the
//! timers. A typed event channel connects them.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod activity;
pub mod alarm;
pub mod clients;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod idle;
pub mod ipc;
pub mod machine;
pub mod signals;
pub mod suspend;
pub mod sysfs;
pub mod timesaver;
pub mod wait;

pub use activity::{Activity, ActivityRegistry};
pub use alarm::{NoPendingAlarms, WakeAlarm, WakeAlarmSource};
pub use clients::{ClientRegistry, ClientVote, NackRateCounter};
pub use config::SleepConfig;
pub use error::{SleepError, SleepResult};
pub use events::{PowerEvent, PowerState, ResumeKind, SuspendPhase};
pub use ipc::{Broadcast, BusRequest, ChannelSink, IpcContext, LogSink, SignalSink};
pub use machine::{KernelPlatform, PowerPlatform, ShutdownMode};
pub use signals::SystemSignals;
pub use suspend::{SuspendCoordinator, SuspendHandle};
