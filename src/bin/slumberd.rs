//! Daemon bootstrap: CLI, logging, config, the two loops

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use slumberd::machine::{self, KernelPlatform, PowerPlatform};
use slumberd::{
    alarm::{NoPendingAlarms, WakeAlarmSource},
    config, ipc, sysfs, ActivityRegistry, ClientRegistry, IpcContext, LogSink, SignalSink,
    SuspendCoordinator, SystemSignals,
};

#[derive(Parser)]
#[command(name = "slumberd")]
#[command(about = "Suspend/resume coordinator daemon")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long, env = "SLUMBERD_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "slumberd=debug"
    #[arg(long, default_value = "slumberd=info")]
    log_filter: String,
}

fn init_tracing(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = Arc::new(config::load(cli.config.as_deref()).context("loading configuration")?);
    let supports_wakelocks = sysfs::wakelock_support(&config.wakelock_probe_path);
    info!(
        machine = %machine::machine_name(),
        wakelocks = supports_wakelocks,
        "slumberd starting"
    );

    let signals = Arc::new(SystemSignals::new());
    let activities = Arc::new(ActivityRegistry::new());
    let clients = Arc::new(ClientRegistry::new());
    let platform: Arc<dyn PowerPlatform> =
        Arc::new(KernelPlatform::new(config.power_state_path.clone()));
    let alarms: Arc<dyn WakeAlarmSource> = Arc::new(NoPendingAlarms);
    let bus: Arc<dyn SignalSink> = Arc::new(LogSink);

    let (coordinator, handle) = SuspendCoordinator::new(
        Arc::clone(&config),
        signals,
        activities,
        clients,
        Arc::clone(&platform),
        alarms,
        bus,
        supports_wakelocks,
    );

    // the suspend loop gets its own thread; failure to stand it up is fatal
    let suspend_thread = coordinator.spawn().context("spawning suspend thread")?;

    let ipc_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building ipc runtime")?;

    let shutdown_handle = handle.clone();
    let socket_path = config.socket_path.clone();
    ipc_runtime.block_on(async move {
        let (bus_tx, bus_rx) = mpsc::unbounded_channel();
        let ctx = IpcContext::new(handle, platform, config);
        tokio::select! {
            outcome = ipc::serve_socket(&socket_path, bus_tx) => {
                if let Err(e) = outcome {
                    tracing::error!(error = %e, "control socket failed");
                }
            }
            _ = ipc::run_ipc_loop(bus_rx, ctx) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
            }
        }
    });

    shutdown_handle.shutdown();
    suspend_thread
        .join()
        .map_err(|_| anyhow::anyhow!("suspend thread panicked"))?;
    info!("slumberd stopped");
    Ok(())
}
