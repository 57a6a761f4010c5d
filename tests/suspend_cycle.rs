//! End-to-end suspend cycle scenarios
//!
//! Each test stands up the full stack — suspend loop, IPC loop, scripted
//! platform — on a paused-clock runtime and drives it through bus requests,
//! asserting on the broadcast stream a transport adapter would see.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use slumberd::{
    alarm::{WakeAlarm, WakeAlarmSource},
    clock,
    error::SleepResult,
    ipc::{self, Broadcast, BusRequest, ChannelSink, IpcContext},
    machine::{PowerPlatform, ShutdownMode},
    ActivityRegistry, ClientRegistry, PowerState, ResumeKind, SleepConfig, SuspendCoordinator,
    SuspendHandle, SuspendPhase, SystemSignals,
};

struct TestPlatform {
    suspend_succeeds: bool,
    calls: AtomicUsize,
}

impl TestPlatform {
    fn new(suspend_succeeds: bool) -> Arc<Self> {
        Arc::new(Self {
            suspend_succeeds,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PowerPlatform for TestPlatform {
    async fn suspend(&self) -> SleepResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.suspend_succeeds)
    }

    fn wakeup(&self) {}

    fn shutdown(&self, _mode: ShutdownMode, _reason: Option<&str>) -> SleepResult<()> {
        Ok(())
    }

    fn reboot(&self, _mode: ShutdownMode, _reason: Option<&str>) -> SleepResult<()> {
        Ok(())
    }
}

struct TestAlarms {
    next_in_secs: Option<i64>,
}

impl WakeAlarmSource for TestAlarms {
    fn next_wakeup(&self) -> Option<WakeAlarm> {
        self.next_in_secs.map(|secs| WakeAlarm {
            expires_at: clock::now_wall() + chrono::Duration::seconds(secs),
            app_id: "com.example.calendar".to_string(),
            key: "wakeup".to_string(),
        })
    }

    fn queue_next_wakeup(&self) -> bool {
        true
    }
}

/// S1-style configuration: first idle tick lands at t = 1100 ms
fn scenario_config() -> SleepConfig {
    SleepConfig {
        wait_idle_ms: 1_100,
        wait_idle_granularity_ms: 100,
        wait_suspend_response_ms: 30_000,
        wait_prepare_suspend_ms: 5_000,
        after_resume_idle_ms: 1_000,
        wait_alarms_s: 60,
        suspend_with_charger: false,
        ..SleepConfig::default()
    }
}

struct Stack {
    bus: mpsc::UnboundedSender<BusRequest>,
    broadcasts: mpsc::UnboundedReceiver<Broadcast>,
    handle: SuspendHandle,
    platform: Arc<TestPlatform>,
    _dir: tempfile::TempDir,
}

impl Stack {
    fn send(&self, request: BusRequest) {
        self.bus.send(request).unwrap();
    }

    async fn expect(&mut self, wanted: Broadcast) {
        let got = tokio::time::timeout(Duration::from_secs(120), self.broadcasts.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {:?}", wanted))
            .expect("broadcast channel closed");
        assert_eq!(got, wanted);
    }

    async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(got)) =
            tokio::time::timeout(window, self.broadcasts.recv()).await
        {
            panic!("unexpected broadcast {:?}", got);
        }
    }
}

fn spawn_stack(
    config: SleepConfig,
    alarms: Arc<dyn WakeAlarmSource>,
    platform: Arc<TestPlatform>,
    supports_wakelocks: bool,
) -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(SleepConfig {
        time_save_path: dir.path().join("time_saved"),
        readiness_file: dir.path().join("suspend_active"),
        ..config
    });
    std::fs::write(&config.readiness_file, "").unwrap();

    let signals = Arc::new(SystemSignals::new());
    let activities = Arc::new(ActivityRegistry::new());
    let clients = Arc::new(ClientRegistry::new());
    let (broadcast_tx, broadcasts) = mpsc::unbounded_channel();

    let (coordinator, handle) = SuspendCoordinator::new(
        Arc::clone(&config),
        signals,
        activities,
        clients,
        platform.clone(),
        alarms,
        Arc::new(ChannelSink::new(broadcast_tx)),
        supports_wakelocks,
    );
    tokio::spawn(coordinator.run());

    let (bus_tx, bus_rx) = mpsc::unbounded_channel();
    let ctx = IpcContext::new(handle.clone(), platform.clone(), config);
    tokio::spawn(ipc::run_ipc_loop(bus_rx, ctx));

    Stack {
        bus: bus_tx,
        broadcasts,
        handle,
        platform,
        _dir: dir,
    }
}

fn no_alarms() -> Arc<dyn WakeAlarmSource> {
    Arc::new(TestAlarms { next_in_secs: None })
}

fn subscribe_two(stack: &Stack) {
    stack.send(BusRequest::Subscribe {
        id: "client-a".to_string(),
    });
    stack.send(BusRequest::Subscribe {
        id: "client-b".to_string(),
    });
    stack.send(BusRequest::DisplayStatus {
        payload: json!({"state": "off"}),
    });
}

fn ack(id: &str, phase: SuspendPhase) -> BusRequest {
    BusRequest::Ack {
        id: id.to_string(),
        phase,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn s1_happy_suspend() {
    let mut stack = spawn_stack(
        scenario_config(),
        no_alarms(),
        TestPlatform::new(true),
        true,
    );
    subscribe_two(&stack);

    // first idle tick fires at t = 1100, past the post-resume awake floor
    stack.expect(Broadcast::SuspendRequest).await;

    stack.send(ack("client-a", SuspendPhase::SuspendRequest));
    stack.send(ack("client-b", SuspendPhase::SuspendRequest));
    stack.expect(Broadcast::PrepareSuspend).await;

    stack.send(ack("client-a", SuspendPhase::PrepareSuspend));
    stack.send(ack("client-b", SuspendPhase::PrepareSuspend));
    stack
        .expect(Broadcast::Suspended {
            message: "attempting to suspend".to_string(),
        })
        .await;
    stack
        .expect(Broadcast::Resume {
            kind: ResumeKind::Kernel,
            message: "resume (kernel)".to_string(),
        })
        .await;

    settle().await;
    assert_eq!(stack.platform.calls(), 1);
    assert_eq!(stack.handle.signals.current_state(), PowerState::On);
}

#[tokio::test(start_paused = true)]
async fn s2_phase_one_nack_stays_awake() {
    let mut stack = spawn_stack(
        scenario_config(),
        no_alarms(),
        TestPlatform::new(true),
        true,
    );
    subscribe_two(&stack);

    stack.expect(Broadcast::SuspendRequest).await;
    stack.send(ack("client-a", SuspendPhase::SuspendRequest));
    stack.send(BusRequest::Nack {
        id: "client-b".to_string(),
        phase: SuspendPhase::SuspendRequest,
        reason: Some("sync in flight".to_string()),
    });

    // the veto returns the machine to on without a prepare broadcast; the
    // next cycle is not due for several seconds
    stack.expect_silence(Duration::from_secs(3)).await;
    assert_eq!(stack.handle.signals.current_state(), PowerState::On);
    assert_eq!(stack.platform.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn s3_phase_two_timeout_proceeds() {
    let mut stack = spawn_stack(
        scenario_config(),
        no_alarms(),
        TestPlatform::new(true),
        true,
    );
    subscribe_two(&stack);

    stack.expect(Broadcast::SuspendRequest).await;
    stack.send(ack("client-a", SuspendPhase::SuspendRequest));
    stack.send(ack("client-b", SuspendPhase::SuspendRequest));
    stack.expect(Broadcast::PrepareSuspend).await;

    // client-b never answers phase 2; after wait_prepare_suspend_ms the
    // timeout counts as tacit approval
    stack.send(ack("client-a", SuspendPhase::PrepareSuspend));
    stack
        .expect(Broadcast::Suspended {
            message: "attempting to suspend".to_string(),
        })
        .await;
    stack
        .expect(Broadcast::Resume {
            kind: ResumeKind::Kernel,
            message: "resume (kernel)".to_string(),
        })
        .await;

    settle().await;
    assert_eq!(stack.platform.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn s4_imminent_alarm_blocks_idle() {
    let mut stack = spawn_stack(
        scenario_config(),
        Arc::new(TestAlarms {
            next_in_secs: Some(30),
        }),
        TestPlatform::new(true),
        true,
    );
    subscribe_two(&stack);

    // the 30 s alarm sits inside the 60 s window: no cycle ever starts
    stack.expect_silence(Duration::from_secs(30)).await;
    assert_eq!(stack.handle.signals.current_state(), PowerState::On);
    assert_eq!(stack.platform.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn s5_activity_race_aborts_before_platform_call() {
    let mut stack = spawn_stack(
        scenario_config(),
        no_alarms(),
        TestPlatform::new(true),
        true,
    );
    subscribe_two(&stack);

    stack.expect(Broadcast::SuspendRequest).await;
    stack.send(ack("client-a", SuspendPhase::SuspendRequest));
    stack.send(ack("client-b", SuspendPhase::SuspendRequest));
    stack.expect(Broadcast::PrepareSuspend).await;

    stack.send(ack("client-a", SuspendPhase::PrepareSuspend));
    // the final ack and a fresh activity land in the same bus batch: the
    // activity is registered before the sleep entry re-checks the registry
    stack.send(ack("client-b", SuspendPhase::PrepareSuspend));
    stack.send(BusRequest::ActivityStart {
        name: "urgent-download".to_string(),
        duration_ms: Some(10_000),
    });

    stack
        .expect(Broadcast::Suspended {
            message: "attempting to suspend".to_string(),
        })
        .await;
    stack
        .expect(Broadcast::Resume {
            kind: ResumeKind::Activity,
            message: "resume (pwrevent_activity)".to_string(),
        })
        .await;

    settle().await;
    assert_eq!(stack.platform.calls(), 0);
    assert_eq!(stack.handle.signals.current_state(), PowerState::On);
}

#[tokio::test(start_paused = true)]
async fn s6_charger_blocks_at_on_idle() {
    let mut stack = spawn_stack(
        scenario_config(),
        no_alarms(),
        TestPlatform::new(true),
        true,
    );
    subscribe_two(&stack);
    stack.send(BusRequest::ChargerStatus {
        payload: json!({"Charging": {"USBConnected": true, "DockPower": false}}),
    });

    // idle fires, but on-idle entry sees the charger and bounces back to on
    stack.expect_silence(Duration::from_secs(10)).await;
    assert_eq!(stack.handle.signals.current_state(), PowerState::On);
    assert_eq!(stack.platform.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_votes_after_phase_close_are_dropped() {
    let mut stack = spawn_stack(
        scenario_config(),
        no_alarms(),
        TestPlatform::new(true),
        true,
    );
    subscribe_two(&stack);

    stack.expect(Broadcast::SuspendRequest).await;
    stack.send(BusRequest::Nack {
        id: "client-a".to_string(),
        phase: SuspendPhase::SuspendRequest,
        reason: None,
    });
    stack.expect_silence(Duration::from_secs(2)).await;

    // the cycle is over; a stale phase-2 ack must not revive it
    stack.send(ack("client-a", SuspendPhase::PrepareSuspend));
    stack.send(ack("client-b", SuspendPhase::PrepareSuspend));
    stack.expect_silence(Duration::from_secs(2)).await;
    assert_eq!(stack.handle.signals.current_state(), PowerState::On);
}

#[tokio::test(start_paused = true)]
async fn freeze_mode_pairs_thaw_across_sleep() {
    // wakelock-less platform: the sleep path freezes the registry and the
    // resume path thaws it
    let mut stack = spawn_stack(
        scenario_config(),
        no_alarms(),
        TestPlatform::new(true),
        false,
    );
    subscribe_two(&stack);

    stack.expect(Broadcast::SuspendRequest).await;
    stack.send(ack("client-a", SuspendPhase::SuspendRequest));
    stack.send(ack("client-b", SuspendPhase::SuspendRequest));
    stack.expect(Broadcast::PrepareSuspend).await;
    stack.send(ack("client-a", SuspendPhase::PrepareSuspend));
    stack.send(ack("client-b", SuspendPhase::PrepareSuspend));
    stack
        .expect(Broadcast::Suspended {
            message: "attempting to suspend".to_string(),
        })
        .await;
    stack
        .expect(Broadcast::Resume {
            kind: ResumeKind::Kernel,
            message: "resume (kernel)".to_string(),
        })
        .await;

    settle().await;
    assert!(!stack.handle.activities.is_frozen());
    assert_eq!(stack.platform.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn display_on_prevents_all_cycles() {
    let mut stack = spawn_stack(
        scenario_config(),
        no_alarms(),
        TestPlatform::new(true),
        true,
    );
    stack.send(BusRequest::Subscribe {
        id: "client-a".to_string(),
    });
    // display never turned off
    stack.expect_silence(Duration::from_secs(30)).await;
    assert_eq!(stack.platform.calls(), 0);
}
