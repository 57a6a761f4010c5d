//! Suspend/resume state machine and the suspend loop that owns it
//!
//! The machine is cyclic across eight states. A suspend cycle runs as one
//! pass through [`SuspendCoordinator::advance`]: the only blocking points are
//! the two bounded phase waits and the platform suspend call itself. All
//! state mutation happens on the suspend loop; the IPC loop reaches in only
//! through [`SuspendHandle`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::activity::ActivityRegistry;
use crate::alarm::WakeAlarmSource;
use crate::clients::{ClientRegistry, NackRateCounter, TableLevel};
use crate::clock::{self, TimePoint};
use crate::config::SleepConfig;
use crate::events::{PowerEvent, PowerState, ResumeKind, SuspendPhase};
use crate::idle::IdleEvaluator;
use crate::ipc::SignalSink;
use crate::machine::PowerPlatform;
use crate::signals::SystemSignals;
use crate::timesaver::TimeSaver;
use crate::wait::{PhaseGate, WaitResult};

/// How a phase wait was decided; exactly one of these triggers the outgoing
/// transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseOutcome {
    Approved,
    Nacked,
    TimedOut,
}

/// Thread-safe handle into the suspend loop for the IPC side
#[derive(Clone)]
pub struct SuspendHandle {
    tx: mpsc::UnboundedSender<PowerEvent>,
    pub clients: Arc<ClientRegistry>,
    pub activities: Arc<ActivityRegistry>,
    pub signals: Arc<SystemSignals>,
    suspend_gate: PhaseGate,
    prepare_gate: PhaseGate,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SuspendHandle {
    /// Post an event into the suspend loop's FIFO queue
    pub fn post(&self, event: PowerEvent) {
        let _ = self.tx.send(event);
    }

    /// A vote was recorded for `phase`; release the phase wait if the votes
    /// now decide it
    ///
    /// Votes arriving while the machine is not in the phase's waiting state
    /// are logged and dropped.
    pub fn vote_changed(&self, phase: SuspendPhase) {
        let state = self.signals.current_state();
        if state == phase.active_state() {
            if self.clients.all_approved(phase) || self.clients.any_nacked(phase) {
                self.gate(phase).signal();
            }
        } else {
            debug!(phase = %phase, state = %state, "vote outside open phase");
        }
        self.post(PowerEvent::VoteChanged(phase));
    }

    /// Stop the suspend loop: in-flight phase waits resolve as timed out and
    /// the loop exits at the next transition
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.suspend_gate.signal();
        self.prepare_gate.signal();
    }

    /// True only in the narrow window after the kernel returned from sleep
    /// and before the resume broadcast goes out
    pub fn is_suspended(&self) -> bool {
        self.signals.is_suspended()
    }

    fn gate(&self, phase: SuspendPhase) -> &PhaseGate {
        match phase {
            SuspendPhase::SuspendRequest => &self.suspend_gate,
            SuspendPhase::PrepareSuspend => &self.prepare_gate,
        }
    }
}

enum Wakeup {
    Event(Option<PowerEvent>),
    IdleTick,
    Shutdown,
}

/// The suspend state machine plus its idle scheduler, run on a dedicated loop
pub struct SuspendCoordinator {
    config: Arc<SleepConfig>,
    signals: Arc<SystemSignals>,
    activities: Arc<ActivityRegistry>,
    clients: Arc<ClientRegistry>,
    platform: Arc<dyn PowerPlatform>,
    alarms: Arc<dyn WakeAlarmSource>,
    bus: Arc<dyn SignalSink>,
    timesaver: TimeSaver,
    supports_wakelocks: bool,

    state: PowerState,
    pending: PowerEvent,
    cycle_forced: bool,
    request_nacks: NackRateCounter,
    prepare_nacks: NackRateCounter,
    idle: IdleEvaluator,

    suspend_gate: PhaseGate,
    prepare_gate: PhaseGate,
    tx: mpsc::UnboundedSender<PowerEvent>,
    rx: mpsc::UnboundedReceiver<PowerEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SuspendCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<SleepConfig>,
        signals: Arc<SystemSignals>,
        activities: Arc<ActivityRegistry>,
        clients: Arc<ClientRegistry>,
        platform: Arc<dyn PowerPlatform>,
        alarms: Arc<dyn WakeAlarmSource>,
        bus: Arc<dyn SignalSink>,
        supports_wakelocks: bool,
    ) -> (Self, SuspendHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let suspend_gate = PhaseGate::new();
        let prepare_gate = PhaseGate::new();

        let handle = SuspendHandle {
            tx: tx.clone(),
            clients: Arc::clone(&clients),
            activities: Arc::clone(&activities),
            signals: Arc::clone(&signals),
            suspend_gate: suspend_gate.clone(),
            prepare_gate: prepare_gate.clone(),
            shutdown: Arc::new(shutdown_tx),
        };

        let idle = IdleEvaluator::new(
            Arc::clone(&config),
            Arc::clone(&signals),
            Arc::clone(&activities),
            Arc::clone(&alarms),
        );
        let timesaver = TimeSaver::new(config.time_save_path.clone());

        let coordinator = Self {
            config,
            signals,
            activities,
            clients,
            platform,
            alarms,
            bus,
            timesaver,
            supports_wakelocks,
            state: PowerState::On,
            pending: PowerEvent::None,
            cycle_forced: false,
            request_nacks: NackRateCounter::new(),
            prepare_nacks: NackRateCounter::new(),
            idle,
            suspend_gate,
            prepare_gate,
            tx,
            rx,
            shutdown_rx,
        };
        (coordinator, handle)
    }

    /// Run the suspend loop on a dedicated thread with its own runtime
    ///
    /// Thread or runtime creation failure is fatal to the daemon; the caller
    /// aborts on the returned error.
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        std::thread::Builder::new()
            .name("suspend".to_string())
            .spawn(move || runtime.block_on(self.run()))
    }

    /// Event loop: waits for posted events or the idle timer
    pub async fn run(mut self) {
        info!(
            wakelocks = self.supports_wakelocks,
            state = %self.state,
            "suspend loop running"
        );
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let deadline = self.idle.deadline();
            let wakeup = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => match changed {
                    Ok(()) => Wakeup::Shutdown,
                    // every handle is gone; nothing can drive us anymore
                    Err(_) => Wakeup::Event(None),
                },
                event = self.rx.recv() => Wakeup::Event(event),
                _ = tokio::time::sleep_until(deadline) => Wakeup::IdleTick,
            };
            match wakeup {
                Wakeup::Shutdown => continue,
                Wakeup::Event(Some(event)) => self.advance(event).await,
                Wakeup::Event(None) => break,
                Wakeup::IdleTick => {
                    if let Some(event) = self.idle.tick() {
                        self.advance(event).await;
                    }
                }
            }
        }
        info!("suspend loop stopped");
    }

    /// Drive the machine with one event, following transitions until it
    /// settles
    pub async fn advance(&mut self, event: PowerEvent) {
        debug!(event = %event, state = %self.state, "power event");
        self.pending = event;
        if self.state == PowerState::On {
            self.cycle_forced = matches!(event, PowerEvent::ForceSuspend);
        }
        loop {
            let next = match self.state {
                PowerState::On => self.state_on(),
                PowerState::OnIdle => self.state_on_idle(),
                PowerState::SuspendRequest => self.state_suspend_request().await,
                PowerState::PrepareSuspend => self.state_prepare_suspend().await,
                PowerState::Sleep => self.state_sleep().await,
                PowerState::KernelResume => self.state_kernel_resume(),
                PowerState::ActivityResume => self.state_activity_resume(),
                PowerState::AbortSuspend => self.state_abort_suspend(),
            };
            let Some(next) = next else { break };
            debug!(from = %self.state, to = %next, "state transition");
            self.state = next;
            self.signals.set_state(next);
            // the resume half of the cycle runs on its own trigger; shutdown
            // stops mid-cycle after the current transition
            if next == PowerState::KernelResume || *self.shutdown_rx.borrow() {
                break;
            }
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    fn can_sleep(&self) -> bool {
        !self.signals.charger_connected() || self.config.suspend_with_charger
    }

    /// Final activity check before the platform call
    ///
    /// On wakelock platforms the kernel enforces this itself, so the check is
    /// advisory; elsewhere it doubles as the freeze that blocks late
    /// registrations for the duration of the attempt.
    fn check_can_suspend(&self, now: TimePoint) -> bool {
        if self.supports_wakelocks {
            !self.activities.any_active(now)
        } else {
            self.activities.freeze(now)
        }
    }

    fn state_on(&mut self) -> Option<PowerState> {
        let next = match self.pending {
            PowerEvent::ForceSuspend => Some(PowerState::SuspendRequest),
            PowerEvent::IdleDetected => Some(PowerState::OnIdle),
            PowerEvent::None => None,
            other => {
                debug!(event = %other, "ignored in on state");
                None
            }
        };
        self.pending = PowerEvent::None;
        next
    }

    fn state_on_idle(&mut self) -> Option<PowerState> {
        if !self.can_sleep() {
            debug!("aborting suspend, machine not ready to sleep (charger plugged in?)");
            return Some(PowerState::On);
        }
        Some(PowerState::SuspendRequest)
    }

    async fn state_suspend_request(&mut self) -> Option<PowerState> {
        self.signals.record_suspend_start(TimePoint::now());
        self.suspend_gate.arm();
        self.clients.reset_votes();
        self.bus.suspend_request();
        debug!(
            wait_ms = self.config.wait_suspend_response_ms,
            "sent suspend request"
        );

        let outcome = self.await_phase(SuspendPhase::SuspendRequest).await;
        self.clients.print_table(TableLevel::Debug);

        let next = match outcome {
            PhaseOutcome::TimedOut => {
                let silent = self.clients.non_responders(SuspendPhase::SuspendRequest);
                debug!(
                    event = %PowerEvent::PhaseTimeout(SuspendPhase::SuspendRequest),
                    non_responders = %silent.join(", "),
                    "timed out waiting for suspend request acks"
                );
                if self.config.strict_phase_timeout {
                    PowerState::On
                } else {
                    PowerState::PrepareSuspend
                }
            }
            PhaseOutcome::Approved => {
                debug!("suspend request approved, moving to prepare suspend");
                PowerState::PrepareSuspend
            }
            PhaseOutcome::Nacked => {
                debug!("suspend request vetoed, staying awake");
                PowerState::On
            }
        };

        if next == PowerState::On {
            if self.request_nacks.bump() {
                warn!(
                    successive = self.request_nacks.successive(),
                    "successive votes against suspend request since last suspend"
                );
                self.clients.print_table(TableLevel::Warn);
            }
        } else {
            self.request_nacks.reset();
        }
        Some(next)
    }

    async fn state_prepare_suspend(&mut self) -> Option<PowerState> {
        self.prepare_gate.arm();
        self.bus.prepare_suspend();
        debug!(
            wait_ms = self.config.wait_prepare_suspend_ms,
            "sent prepare suspend"
        );

        let outcome = self.await_phase(SuspendPhase::PrepareSuspend).await;
        self.clients.print_table(TableLevel::Debug);

        match outcome {
            PhaseOutcome::TimedOut => {
                let silent = self.clients.non_responders(SuspendPhase::PrepareSuspend);
                debug!(
                    event = %PowerEvent::PhaseTimeout(SuspendPhase::PrepareSuspend),
                    non_responders = %silent.join(", "),
                    "timed out waiting for prepare suspend acks"
                );
                if self.config.strict_phase_timeout {
                    if self.prepare_nacks.bump() {
                        self.clients.print_table(TableLevel::Warn);
                    }
                    Some(PowerState::AbortSuspend)
                } else {
                    self.prepare_nacks.reset();
                    Some(PowerState::Sleep)
                }
            }
            PhaseOutcome::Approved => {
                debug!("clients approved prepare suspend");
                self.prepare_nacks.reset();
                Some(PowerState::Sleep)
            }
            PhaseOutcome::Nacked => {
                debug!("prepare suspend vetoed, aborting");
                if self.prepare_nacks.bump() {
                    warn!(
                        successive = self.prepare_nacks.successive(),
                        "successive votes against prepare suspend since last suspend"
                    );
                    self.clients.print_table(TableLevel::Warn);
                }
                Some(PowerState::AbortSuspend)
            }
        }
    }

    /// Bounded wait for a phase decision
    ///
    /// The first of all-approved, any-nacked, or timeout decides; later vote
    /// changes for the same phase are ignored.
    async fn await_phase(&self, phase: SuspendPhase) -> PhaseOutcome {
        // a vote landing between phase entry and the arm above is already
        // recorded; skip the wait when it was decisive
        if !self.clients.all_approved(phase) && !self.clients.any_nacked(phase) {
            let timeout_ms = match phase {
                SuspendPhase::SuspendRequest => self.config.wait_suspend_response_ms,
                SuspendPhase::PrepareSuspend => self.config.wait_prepare_suspend_ms,
            };
            let gate = match phase {
                SuspendPhase::SuspendRequest => &self.suspend_gate,
                SuspendPhase::PrepareSuspend => &self.prepare_gate,
            };
            if gate.wait(Duration::from_millis(timeout_ms)).await == WaitResult::TimedOut {
                return PhaseOutcome::TimedOut;
            }
        }
        if self.clients.any_nacked(phase) {
            PhaseOutcome::Nacked
        } else if self.clients.all_approved(phase) {
            PhaseOutcome::Approved
        } else if *self.shutdown_rx.borrow() {
            // the shutdown hook signaled the gate; resolve as a timeout so
            // the loop can wind down through the normal transitions
            PhaseOutcome::TimedOut
        } else {
            PhaseOutcome::Nacked
        }
    }

    async fn state_sleep(&mut self) -> Option<PowerState> {
        debug!("trying to sleep now");
        self.bus.suspended("attempting to suspend");

        if let Some(alarm) = self.alarms.next_wakeup() {
            let in_secs = (alarm.expires_at - clock::now_wall()).num_seconds();
            debug!(in_secs, key = %alarm.key, "next wakeup alarm");
        }

        self.instrument_on_sleep();
        // save the current time to disk in case the battery is pulled
        if let Err(e) = self.timesaver.save() {
            warn!(error = %e, "could not persist wall clock");
        }

        let suspended_at = self.signals.stamps().suspended_at;
        if !self.cycle_forced && !self.check_can_suspend(suspended_at) {
            debug!("aborting sleep because of current activity");
            self.activities.log_active_since(suspended_at);
            return Some(PowerState::ActivityResume);
        }
        if !self.can_sleep() {
            debug!("aborting sleep, charger connected");
            return Some(PowerState::AbortSuspend);
        }
        if !self.alarms.queue_next_wakeup() {
            debug!("aborting sleep, wakeup alarm could not be armed");
            return Some(PowerState::AbortSuspend);
        }

        match self.platform.suspend().await {
            Ok(true) => {
                // the kernel is awake again; the resume half runs on its own
                // event so late wakeup triggers collapse into one broadcast
                let _ = self.tx.send(PowerEvent::ResumedByKernel);
                Some(PowerState::KernelResume)
            }
            Ok(false) => {
                debug!("platform refused suspend");
                Some(PowerState::AbortSuspend)
            }
            Err(e) => {
                warn!(error = %e, "platform suspend failed");
                Some(PowerState::AbortSuspend)
            }
        }
    }

    fn state_kernel_resume(&mut self) -> Option<PowerState> {
        match self.pending {
            PowerEvent::ResumedByKernel => {
                self.pending = PowerEvent::None;
                self.resume(ResumeKind::Kernel)
            }
            event => {
                if event != PowerEvent::None {
                    debug!(event = %event, "ignored while kernel resume pending");
                }
                self.pending = PowerEvent::None;
                None
            }
        }
    }

    fn state_activity_resume(&mut self) -> Option<PowerState> {
        self.resume(ResumeKind::Activity)
    }

    fn state_abort_suspend(&mut self) -> Option<PowerState> {
        debug!("suspend aborted");
        if !self.supports_wakelocks {
            self.activities.thaw();
        }
        self.bus
            .resume(ResumeKind::Abort, "resume (suspend aborted)");
        Some(PowerState::On)
    }

    fn resume(&mut self, kind: ResumeKind) -> Option<PowerState> {
        self.platform.wakeup();
        if !self.supports_wakelocks {
            self.activities.thaw();
        }
        self.bus
            .resume(kind, &format!("resume ({})", kind.description()));
        self.instrument_on_wake(kind);
        // if nothing keeps us awake, the next idle check may suspend again
        self.idle.schedule(self.config.after_resume_idle_ms);
        Some(PowerState::On)
    }

    fn instrument_on_sleep(&mut self) {
        let now = TimePoint::now();
        self.signals.record_suspended(now, clock::now_wall());
        let stamps = self.signals.stamps();
        info!(
            awake_for = %clock::format_duration(now.diff(stamps.last_wake)),
            decision_took = %clock::format_duration(now.diff(stamps.suspend_start)),
            "sleeping"
        );
        self.clients.print_table(TableLevel::Debug);
    }

    fn instrument_on_wake(&self, kind: ResumeKind) {
        let now = TimePoint::now();
        let rtc = clock::now_wall();
        let asleep = rtc - self.signals.stamps().suspend_rtc;
        self.signals.record_wake(now, rtc);
        info!(kind = %kind, asleep_secs = asleep.num_seconds(), "woke");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::NoPendingAlarms;
    use crate::ipc::{Broadcast, ChannelSink};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedPlatform {
        results: Mutex<Vec<bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedPlatform {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(vec![true; 8]),
                calls: AtomicUsize::new(0),
            })
        }

        fn refusing() -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(vec![false; 8]),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PowerPlatform for ScriptedPlatform {
        async fn suspend(&self) -> crate::error::SleepResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.results.lock().remove(0))
        }

        fn wakeup(&self) {}

        fn shutdown(
            &self,
            _mode: crate::machine::ShutdownMode,
            _reason: Option<&str>,
        ) -> crate::error::SleepResult<()> {
            Ok(())
        }

        fn reboot(
            &self,
            _mode: crate::machine::ShutdownMode,
            _reason: Option<&str>,
        ) -> crate::error::SleepResult<()> {
            Ok(())
        }
    }

    struct Harness {
        coordinator: SuspendCoordinator,
        handle: SuspendHandle,
        platform: Arc<ScriptedPlatform>,
        broadcasts: mpsc::UnboundedReceiver<Broadcast>,
        _dir: tempfile::TempDir,
    }

    fn harness(platform: Arc<ScriptedPlatform>, wakelocks: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(SleepConfig {
            time_save_path: dir.path().join("time_saved"),
            readiness_file: dir.path().join("suspend_active"),
            ..SleepConfig::default()
        });
        let signals = Arc::new(SystemSignals::new());
        signals.set_display_on(false);
        let activities = Arc::new(ActivityRegistry::new());
        let clients = Arc::new(ClientRegistry::new());
        let (broadcast_tx, broadcasts) = mpsc::unbounded_channel();
        let (coordinator, handle) = SuspendCoordinator::new(
            config,
            signals,
            activities,
            clients,
            platform.clone(),
            Arc::new(NoPendingAlarms),
            Arc::new(ChannelSink::new(broadcast_tx)),
            wakelocks,
        );
        Harness {
            coordinator,
            handle,
            platform,
            broadcasts,
            _dir: dir,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Broadcast>) -> Vec<Broadcast> {
        let mut out = Vec::new();
        while let Ok(b) = rx.try_recv() {
            out.push(b);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_events_ignored_in_on() {
        let mut h = harness(ScriptedPlatform::succeeding(), true);
        h.coordinator.advance(PowerEvent::DisplayChanged(true)).await;
        h.coordinator.advance(PowerEvent::ChargerChanged(true)).await;
        h.coordinator
            .advance(PowerEvent::VoteChanged(SuspendPhase::SuspendRequest))
            .await;
        h.coordinator.advance(PowerEvent::ResumedByKernel).await;
        assert_eq!(h.coordinator.state(), PowerState::On);
        assert!(drain(&mut h.broadcasts).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_with_no_clients() {
        let mut h = harness(ScriptedPlatform::succeeding(), true);

        h.coordinator.advance(PowerEvent::IdleDetected).await;
        assert_eq!(h.coordinator.state(), PowerState::KernelResume);
        assert!(h.handle.is_suspended());
        assert_eq!(h.platform.calls(), 1);

        h.coordinator.advance(PowerEvent::ResumedByKernel).await;
        assert_eq!(h.coordinator.state(), PowerState::On);
        assert!(!h.handle.is_suspended());

        assert_eq!(
            drain(&mut h.broadcasts),
            vec![
                Broadcast::SuspendRequest,
                Broadcast::PrepareSuspend,
                Broadcast::Suspended {
                    message: "attempting to suspend".to_string()
                },
                Broadcast::Resume {
                    kind: ResumeKind::Kernel,
                    message: "resume (kernel)".to_string()
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn charger_gate_returns_to_on() {
        let mut h = harness(ScriptedPlatform::succeeding(), true);
        h.handle.signals.set_charger(true, false);

        h.coordinator.advance(PowerEvent::IdleDetected).await;
        assert_eq!(h.coordinator.state(), PowerState::On);
        assert!(drain(&mut h.broadcasts).is_empty());
        assert_eq!(h.platform.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn platform_refusal_aborts() {
        let mut h = harness(ScriptedPlatform::refusing(), true);
        h.coordinator.advance(PowerEvent::IdleDetected).await;
        assert_eq!(h.coordinator.state(), PowerState::On);

        let broadcasts = drain(&mut h.broadcasts);
        assert_eq!(
            broadcasts.last(),
            Some(&Broadcast::Resume {
                kind: ResumeKind::Abort,
                message: "resume (suspend aborted)".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn activity_race_resumes_without_platform_call() {
        let mut h = harness(ScriptedPlatform::succeeding(), true);
        // registered before the pre-sleep re-check runs
        h.handle.activities.add("late-download", Some(10_000));

        h.coordinator.advance(PowerEvent::IdleDetected).await;
        assert_eq!(h.coordinator.state(), PowerState::On);
        assert_eq!(h.platform.calls(), 0);

        let broadcasts = drain(&mut h.broadcasts);
        assert_eq!(
            broadcasts.last(),
            Some(&Broadcast::Resume {
                kind: ResumeKind::Activity,
                message: "resume (pwrevent_activity)".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn force_suspend_skips_activity_recheck() {
        let mut h = harness(ScriptedPlatform::succeeding(), true);
        h.handle.activities.add("busy", Some(60_000));

        h.coordinator.advance(PowerEvent::ForceSuspend).await;
        // the activity would normally abort the attempt; force goes through
        assert_eq!(h.coordinator.state(), PowerState::KernelResume);
        assert_eq!(h.platform.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn freeze_thaw_paired_on_success_and_abort() {
        // non-wakelock platform: sleep path freezes, every exit thaws
        let mut h = harness(ScriptedPlatform::succeeding(), false);
        h.coordinator.advance(PowerEvent::IdleDetected).await;
        assert_eq!(h.coordinator.state(), PowerState::KernelResume);
        assert!(h.handle.activities.is_frozen());

        h.coordinator.advance(PowerEvent::ResumedByKernel).await;
        assert!(!h.handle.activities.is_frozen());

        // refused platform call exits through abort, which must also thaw
        let mut h = harness(ScriptedPlatform::refusing(), false);
        h.coordinator.advance(PowerEvent::IdleDetected).await;
        assert_eq!(h.coordinator.state(), PowerState::On);
        assert!(!h.handle.activities.is_frozen());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_kernel_resume_collapses() {
        let mut h = harness(ScriptedPlatform::succeeding(), true);
        h.coordinator.advance(PowerEvent::IdleDetected).await;
        h.coordinator.advance(PowerEvent::ResumedByKernel).await;
        h.coordinator.advance(PowerEvent::ResumedByKernel).await;
        h.coordinator.advance(PowerEvent::ResumedByKernel).await;

        let resumes = drain(&mut h.broadcasts)
            .into_iter()
            .filter(|b| matches!(b, Broadcast::Resume { .. }))
            .count();
        assert_eq!(resumes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_timeout_vetoes_phase_one() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(SleepConfig {
            strict_phase_timeout: true,
            wait_suspend_response_ms: 1_000,
            time_save_path: dir.path().join("time_saved"),
            ..SleepConfig::default()
        });
        let signals = Arc::new(SystemSignals::new());
        signals.set_display_on(false);
        let clients = Arc::new(ClientRegistry::new());
        clients.register("silent");
        let (broadcast_tx, mut broadcasts) = mpsc::unbounded_channel();
        let (mut coordinator, _handle) = SuspendCoordinator::new(
            config,
            signals,
            Arc::new(ActivityRegistry::new()),
            clients,
            ScriptedPlatform::succeeding(),
            Arc::new(NoPendingAlarms),
            Arc::new(ChannelSink::new(broadcast_tx)),
            true,
        );

        coordinator.advance(PowerEvent::IdleDetected).await;
        assert_eq!(coordinator.state(), PowerState::On);
        assert_eq!(drain(&mut broadcasts), vec![Broadcast::SuspendRequest]);
    }
}
