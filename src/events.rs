//! Power states, events, and phase tags shared across the daemon

use serde::{Deserialize, Serialize};

/// States of the suspend/resume machine
///
/// The machine is cyclic; `On` is the initial and resting state. Only the
/// suspend loop mutates the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerState {
    On = 0,
    OnIdle = 1,
    SuspendRequest = 2,
    PrepareSuspend = 3,
    Sleep = 4,
    KernelResume = 5,
    ActivityResume = 6,
    AbortSuspend = 7,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::On => "on",
            PowerState::OnIdle => "on-idle",
            PowerState::SuspendRequest => "suspend-request",
            PowerState::PrepareSuspend => "prepare-suspend",
            PowerState::Sleep => "sleep",
            PowerState::KernelResume => "kernel-resume",
            PowerState::ActivityResume => "activity-resume",
            PowerState::AbortSuspend => "abort-suspend",
        }
    }

    /// Decode the atomic representation stored in the shared signals
    pub fn from_u8(raw: u8) -> PowerState {
        match raw {
            1 => PowerState::OnIdle,
            2 => PowerState::SuspendRequest,
            3 => PowerState::PrepareSuspend,
            4 => PowerState::Sleep,
            5 => PowerState::KernelResume,
            6 => PowerState::ActivityResume,
            7 => PowerState::AbortSuspend,
            _ => PowerState::On,
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two client-handshake phases of a suspend cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendPhase {
    SuspendRequest,
    PrepareSuspend,
}

impl SuspendPhase {
    /// The machine state during which votes for this phase are open
    pub fn active_state(self) -> PowerState {
        match self {
            SuspendPhase::SuspendRequest => PowerState::SuspendRequest,
            SuspendPhase::PrepareSuspend => PowerState::PrepareSuspend,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SuspendPhase::SuspendRequest => "suspend_request",
            SuspendPhase::PrepareSuspend => "prepare_suspend",
        }
    }
}

impl std::fmt::Display for SuspendPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs driving the suspend state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// No-op marker; ignored in every state
    None,
    /// The idle evaluator decided the device may suspend
    IdleDetected,
    /// Administrative request to suspend regardless of idleness
    ForceSuspend,
    /// A client vote arrived for the given phase
    VoteChanged(SuspendPhase),
    /// The bounded wait for the given phase elapsed
    PhaseTimeout(SuspendPhase),
    /// Display turned on or off
    DisplayChanged(bool),
    /// Charger plugged or unplugged
    ChargerChanged(bool),
    /// The platform suspend primitive returned; the kernel is awake
    ResumedByKernel,
}

impl std::fmt::Display for PowerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerEvent::None => write!(f, "none"),
            PowerEvent::IdleDetected => write!(f, "idle-detected"),
            PowerEvent::ForceSuspend => write!(f, "force-suspend"),
            PowerEvent::VoteChanged(phase) => write!(f, "vote-changed({})", phase),
            PowerEvent::PhaseTimeout(phase) => write!(f, "phase-timeout({})", phase),
            PowerEvent::DisplayChanged(on) => write!(f, "display-changed({})", on),
            PowerEvent::ChargerChanged(c) => write!(f, "charger-changed({})", c),
            PowerEvent::ResumedByKernel => write!(f, "resumed-by-kernel"),
        }
    }
}

/// Why a resume broadcast is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeKind {
    /// The platform suspend primitive returned after a real sleep
    Kernel,
    /// A late activity registration aborted the attempt before the platform call
    Activity,
    /// A phase-2 veto or a failed pre-sleep check aborted after commitment
    Abort,
}

impl ResumeKind {
    /// Wire description carried in the resume broadcast
    pub fn description(self) -> &'static str {
        match self {
            ResumeKind::Kernel => "kernel",
            ResumeKind::Activity => "pwrevent_activity",
            ResumeKind::Abort => "abort_suspend",
        }
    }
}

impl std::fmt::Display for ResumeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}
