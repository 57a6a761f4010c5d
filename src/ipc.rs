//! Bus boundary: outbound broadcasts, inbound requests, status decoders
//!
//! The wire format of the IPC bus itself is out of scope; this module owns
//! the narrow surface the coordinator consumes from it. Outbound signals go
//! through [`SignalSink`]; inbound traffic arrives as [`BusRequest`] values
//! that the IPC loop translates into registry mutations, signal updates, and
//! state-machine events.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SleepConfig;
use crate::error::SleepResult;
use crate::events::{PowerEvent, ResumeKind, SuspendPhase};
use crate::machine::{self, PowerPlatform};
use crate::signals::SystemSignals;
use crate::suspend::SuspendHandle;

/// Outbound broadcasts published by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Broadcast {
    SuspendRequest,
    PrepareSuspend,
    Suspended { message: String },
    Resume { kind: ResumeKind, message: String },
}

/// Sink for the coordinator's broadcasts
///
/// Fire-and-forget: delivery is not tracked beyond the votes that come back.
pub trait SignalSink: Send + Sync {
    fn suspend_request(&self);
    fn prepare_suspend(&self);
    fn suspended(&self, message: &str);
    fn resume(&self, kind: ResumeKind, message: &str);
}

/// Sink that forwards broadcasts into a channel, for bus adapters and tests
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Broadcast>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Broadcast>) -> Self {
        Self { tx }
    }
}

impl SignalSink for ChannelSink {
    fn suspend_request(&self) {
        let _ = self.tx.send(Broadcast::SuspendRequest);
    }

    fn prepare_suspend(&self) {
        let _ = self.tx.send(Broadcast::PrepareSuspend);
    }

    fn suspended(&self, message: &str) {
        let _ = self.tx.send(Broadcast::Suspended {
            message: message.to_string(),
        });
    }

    fn resume(&self, kind: ResumeKind, message: &str) {
        let _ = self.tx.send(Broadcast::Resume {
            kind,
            message: message.to_string(),
        });
    }
}

/// Sink that only logs, for transports wired up out of process
pub struct LogSink;

impl SignalSink for LogSink {
    fn suspend_request(&self) {
        info!("broadcast: suspend request");
    }

    fn prepare_suspend(&self) {
        info!("broadcast: prepare suspend");
    }

    fn suspended(&self, message: &str) {
        info!(detail = message, "broadcast: suspended");
    }

    fn resume(&self, kind: ResumeKind, message: &str) {
        info!(kind = %kind, detail = message, "broadcast: resume");
    }
}

/// Inbound bus traffic after transport decoding
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusRequest {
    Subscribe {
        id: String,
    },
    Unsubscribe {
        id: String,
    },
    Ack {
        id: String,
        phase: SuspendPhase,
    },
    Nack {
        id: String,
        phase: SuspendPhase,
        #[serde(default)]
        reason: Option<String>,
    },
    ActivityStart {
        name: String,
        #[serde(default)]
        duration_ms: Option<u32>,
    },
    ActivityEnd {
        name: String,
    },
    DisplayStatus {
        payload: Value,
    },
    ChargerStatus {
        payload: Value,
    },
    ForceSuspend {
        #[serde(default)]
        reason: Option<String>,
    },
    Resumed,
    Shutdown {
        #[serde(default)]
        reason: Option<String>,
    },
    Reboot {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DisplayStatusPayload {
    state: Option<String>,
    event: Option<String>,
    #[serde(rename = "blockDisplay")]
    block_display: Option<Boolish>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Boolish {
    Flag(bool),
    Text(String),
}

impl Boolish {
    fn as_bool(&self) -> Option<bool> {
        match self {
            Boolish::Flag(b) => Some(*b),
            Boolish::Text(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
        }
    }
}

/// Decoder for display-manager status messages
///
/// The first response carries a `state` field; later ones carry only an
/// `event`. A `blockDisplay` flag is sticky across messages and forces the
/// display to read as on while set.
#[derive(Debug, Default)]
pub struct DisplayDecoder {
    block_display: bool,
}

impl DisplayDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one status payload; returns the resulting display state
    pub fn apply(&mut self, payload: &Value, signals: &SystemSignals) -> SleepResult<bool> {
        let decoded: DisplayStatusPayload = serde_json::from_value(payload.clone())?;
        let mut on = signals.display_on();

        if let Some(state) = decoded.state.as_deref() {
            match state {
                "off" => on = false,
                "on" | "dimmed" => on = true,
                _ => {}
            }
        }
        if let Some(event) = decoded.event.as_deref() {
            match event {
                "displayOn" => on = true,
                "displayOff" => on = false,
                _ => {}
            }
        }
        if let Some(block) = decoded.block_display.as_ref().and_then(Boolish::as_bool) {
            self.block_display = block;
        }
        if self.block_display {
            on = true;
        }

        signals.set_display_on(on);
        debug!(display_on = on, "display status");
        Ok(on)
    }
}

#[derive(Debug, Deserialize)]
struct ChargerStatusPayload {
    #[serde(rename = "Charging")]
    charging: Option<ChargingBlock>,
}

#[derive(Debug, Deserialize)]
struct ChargingBlock {
    #[serde(rename = "USBConnected", default)]
    usb_connected: bool,
    #[serde(rename = "DockPower", default)]
    dock_power: bool,
}

/// Apply one charger status payload; returns the new connected state, or
/// `None` when the payload carried no charging block
pub fn apply_charger_status(payload: &Value, signals: &SystemSignals) -> SleepResult<Option<bool>> {
    let decoded: ChargerStatusPayload = serde_json::from_value(payload.clone())?;
    let Some(charging) = decoded.charging else {
        return Ok(None);
    };
    let connected = signals.set_charger(charging.usb_connected, charging.dock_power);
    debug!(
        usb = charging.usb_connected,
        dock = charging.dock_power,
        connected,
        "charger status"
    );
    Ok(Some(connected))
}

/// Everything the IPC loop needs to service requests
pub struct IpcContext {
    pub handle: SuspendHandle,
    pub platform: Arc<dyn PowerPlatform>,
    pub config: Arc<SleepConfig>,
    display: DisplayDecoder,
}

impl IpcContext {
    pub fn new(
        handle: SuspendHandle,
        platform: Arc<dyn PowerPlatform>,
        config: Arc<SleepConfig>,
    ) -> Self {
        Self {
            handle,
            platform,
            config,
            display: DisplayDecoder::new(),
        }
    }
}

/// Translate inbound bus traffic until the channel closes
///
/// Every request body is non-blocking; the suspend loop never runs here.
pub async fn run_ipc_loop(mut rx: mpsc::UnboundedReceiver<BusRequest>, mut ctx: IpcContext) {
    while let Some(request) = rx.recv().await {
        handle_request(&mut ctx, request);
    }
    debug!("ipc loop exited");
}

fn handle_request(ctx: &mut IpcContext, request: BusRequest) {
    match request {
        BusRequest::Subscribe { id } => {
            debug!(client = %id, "client subscribed");
            ctx.handle.clients.register(&id);
        }
        BusRequest::Unsubscribe { id } => {
            if let Err(e) = ctx.handle.clients.unregister(&id) {
                debug!(error = %e, "dropping unsubscribe");
            } else {
                debug!(client = %id, "client unsubscribed");
            }
        }
        BusRequest::Ack { id, phase } => match ctx.handle.clients.ack(&id, phase) {
            Ok(()) => ctx.handle.vote_changed(phase),
            Err(e) => warn!(error = %e, phase = %phase, "dropping ack"),
        },
        BusRequest::Nack { id, phase, reason } => {
            match ctx.handle.clients.nack(&id, phase, reason.as_deref()) {
                Ok(()) => ctx.handle.vote_changed(phase),
                Err(e) => warn!(error = %e, phase = %phase, "dropping nack"),
            }
        }
        BusRequest::ActivityStart { name, duration_ms } => {
            use crate::activity::ActivityAdd;
            match ctx.handle.activities.add(&name, duration_ms) {
                ActivityAdd::Started => debug!(activity = %name, ?duration_ms, "activity started"),
                ActivityAdd::Refreshed => debug!(activity = %name, "activity refreshed"),
                ActivityAdd::Frozen => {
                    debug!(activity = %name, "activity refused, suspend in progress")
                }
            }
        }
        BusRequest::ActivityEnd { name } => {
            if ctx.handle.activities.remove(&name) {
                debug!(activity = %name, "activity ended");
            } else {
                debug!(activity = %name, "dropping end for unknown activity");
            }
        }
        BusRequest::DisplayStatus { payload } => {
            match ctx.display.apply(&payload, &ctx.handle.signals) {
                Ok(on) => ctx.handle.post(PowerEvent::DisplayChanged(on)),
                // previous signal value retained
                Err(e) => debug!(error = %e, "dropping display status"),
            }
        }
        BusRequest::ChargerStatus { payload } => {
            match apply_charger_status(&payload, &ctx.handle.signals) {
                Ok(Some(connected)) => ctx.handle.post(PowerEvent::ChargerChanged(connected)),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "dropping charger status"),
            }
        }
        BusRequest::ForceSuspend { reason } => {
            info!(reason = reason.as_deref().unwrap_or("-"), "force suspend requested");
            ctx.handle.post(PowerEvent::ForceSuspend);
        }
        BusRequest::Resumed => {
            ctx.handle.post(PowerEvent::ResumedByKernel);
        }
        BusRequest::Shutdown { reason } => {
            machine::force_shutdown(&ctx.platform, &ctx.config, reason.as_deref());
        }
        BusRequest::Reboot { reason } => {
            machine::force_reboot(&ctx.platform, &ctx.config, reason.as_deref());
        }
    }
}

/// Accept line-delimited JSON requests on a unix socket and feed the IPC loop
pub async fn serve_socket(
    path: &std::path::Path,
    tx: mpsc::UnboundedSender<BusRequest>,
) -> SleepResult<()> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path).map_err(crate::error::SleepError::Transport)?;
    info!(socket = %path.display(), "control socket ready");
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(crate::error::SleepError::Transport)?;
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<BusRequest>(&line) {
                    Ok(request) => {
                        let _ = tx.send(request);
                    }
                    Err(e) => debug!(error = %e, "dropping malformed control message"),
                }
            }
        });
    }
}
