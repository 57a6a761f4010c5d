//! Platform power device and machine identity
//!
//! The suspend primitive is the one call that blocks until the kernel wakes
//! back up; everything else here is a thin wrapper the state machine drives.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::SleepConfig;
use crate::error::{SleepError, SleepResult};
use crate::sysfs;

/// Shutdown and reboot flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Normal,
    Emergency,
}

/// The platform's power primitives
///
/// `suspend` is expected to return only after the kernel has resumed; a
/// return of `Ok(false)` means the kernel refused the transition (a wakeup
/// source fired first) and the attempt should be treated as aborted.
#[async_trait]
pub trait PowerPlatform: Send + Sync {
    async fn suspend(&self) -> SleepResult<bool>;

    /// Undo any platform-side suspend preparation after wake
    fn wakeup(&self);

    fn shutdown(&self, mode: ShutdownMode, reason: Option<&str>) -> SleepResult<()>;

    fn reboot(&self, mode: ShutdownMode, reason: Option<&str>) -> SleepResult<()>;
}

/// Platform backed by the kernel sysfs suspend interface
pub struct KernelPlatform {
    state_path: PathBuf,
}

impl KernelPlatform {
    pub fn new(state_path: PathBuf) -> Self {
        Self { state_path }
    }
}

#[async_trait]
impl PowerPlatform for KernelPlatform {
    async fn suspend(&self) -> SleepResult<bool> {
        let path = self.state_path.clone();
        // the write blocks the calling thread for the whole sleep; keep the
        // runtime's timer thread out of it
        let outcome = tokio::task::spawn_blocking(move || std::fs::write(&path, "mem"))
            .await
            .map_err(|e| SleepError::Platform(e.to_string()))?;
        match outcome {
            Ok(()) => Ok(true),
            // EBUSY: a wakeup source fired between commit and the write
            Err(e) if e.raw_os_error() == Some(16) => {
                debug!("kernel refused suspend, wakeup source pending");
                Ok(false)
            }
            Err(e) => Err(SleepError::Platform(e.to_string())),
        }
    }

    fn wakeup(&self) {
        debug!("platform wakeup");
    }

    fn shutdown(&self, mode: ShutdownMode, reason: Option<&str>) -> SleepResult<()> {
        let mut cmd = Command::new("systemctl");
        cmd.arg("poweroff");
        if mode == ShutdownMode::Emergency {
            cmd.args(["--force", "--force"]);
        }
        debug!(?mode, reason = reason.unwrap_or("-"), "dispatching shutdown");
        cmd.status()
            .map_err(|e| SleepError::Platform(e.to_string()))?;
        Ok(())
    }

    fn reboot(&self, mode: ShutdownMode, reason: Option<&str>) -> SleepResult<()> {
        let mut cmd = Command::new("systemctl");
        cmd.arg("reboot");
        if mode == ShutdownMode::Emergency {
            cmd.args(["--force", "--force"]);
        }
        debug!(?mode, reason = reason.unwrap_or("-"), "dispatching reboot");
        cmd.status()
            .map_err(|e| SleepError::Platform(e.to_string()))?;
        Ok(())
    }
}

/// Shut the system down, honoring the `fasthalt` policy
pub fn force_shutdown(
    platform: &Arc<dyn PowerPlatform>,
    config: &SleepConfig,
    reason: Option<&str>,
) {
    info!(reason = reason.unwrap_or("-"), "shutting down system");
    let mode = if config.fasthalt {
        ShutdownMode::Emergency
    } else {
        ShutdownMode::Normal
    };
    if let Err(e) = platform.shutdown(mode, reason) {
        warn!(error = %e, "shutdown dispatch failed");
    }
}

/// Reboot the system, honoring the `fasthalt` policy
pub fn force_reboot(
    platform: &Arc<dyn PowerPlatform>,
    config: &SleepConfig,
    reason: Option<&str>,
) {
    info!(reason = reason.unwrap_or("-"), "rebooting system");
    let mode = if config.fasthalt {
        ShutdownMode::Emergency
    } else {
        ShutdownMode::Normal
    };
    if let Err(e) = platform.reboot(mode, reason) {
        warn!(error = %e, "reboot dispatch failed");
    }
}

/// Toggle the charger bypass pin; `0` means bypass on, `1` off
pub fn set_charge_bypass(pin: &Path, enabled: bool) -> SleepResult<()> {
    sysfs::write_string(pin, if enabled { "0" } else { "1" })
}

/// The machine-specific release name
///
/// Reads the kernel release and returns the first `-`-delimited suffix that
/// does not start with a digit, e.g. `6.1.22-11-palm-joplin-2430` gives
/// `palm-joplin-2430`. Falls back to `unknown`.
pub fn machine_name() -> String {
    let release = std::fs::read_to_string("/proc/sys/kernel/osrelease").unwrap_or_default();
    parse_release_name(release.trim()).unwrap_or_else(|| "unknown".to_string())
}

fn parse_release_name(release: &str) -> Option<String> {
    let mut rest = release;
    loop {
        let dash = rest.find('-')?;
        rest = &rest[dash + 1..];
        if !rest.starts_with(|c: char| c.is_ascii_digit()) {
            break;
        }
    }
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}
