//! Daemon configuration
//!
//! Loading hierarchy: env > file > defaults. The snapshot is taken once at
//! init and never mutated afterwards; every component holds it behind an
//! `Arc`. A missing or malformed option is fatal to the daemon.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{SleepError, SleepResult};

/// Prefix for environment variable overrides
const ENV_PREFIX: &str = "SLUMBERD_";

/// Read-only configuration snapshot for the suspend coordinator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    /// Nominal idle-check interval
    pub wait_idle_ms: u64,
    /// Coalescing granularity for the idle timer
    pub wait_idle_granularity_ms: u64,
    /// Phase-1 timeout: clients ACK/NACK the suspend request broadcast
    pub wait_suspend_response_ms: u64,
    /// Phase-2 timeout: clients ACK/NACK the prepare-suspend broadcast
    pub wait_prepare_suspend_ms: u64,
    /// Minimum awake window after any resume before idle may trigger suspend
    pub after_resume_idle_ms: u64,
    /// Skip suspending when the next wake alarm is within this many seconds
    pub wait_alarms_s: u64,
    /// Allow suspending while a charger is connected
    pub suspend_with_charger: bool,
    /// Use the emergency shutdown/reboot paths
    pub fasthalt: bool,
    /// Treat a phase timeout as a veto instead of tacit approval
    pub strict_phase_timeout: bool,

    /// File whose existence signals the system is booted enough to suspend
    pub readiness_file: PathBuf,
    /// Kernel path probed at init to detect wakelock support
    pub wakelock_probe_path: PathBuf,
    /// Kernel suspend interface written by the platform device
    pub power_state_path: PathBuf,
    /// Where the wall clock is persisted on entry to sleep
    pub time_save_path: PathBuf,
    /// Directory holding hardware tokens
    pub token_dir: PathBuf,
    /// Sysfs pin controlling the charger bypass
    pub charge_bypass_pin: PathBuf,
    /// Control socket the bus transport listens on
    pub socket_path: PathBuf,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            wait_idle_ms: 5_000,
            wait_idle_granularity_ms: 100,
            wait_suspend_response_ms: 30_000,
            wait_prepare_suspend_ms: 5_000,
            after_resume_idle_ms: 1_000,
            wait_alarms_s: 60,
            suspend_with_charger: false,
            fasthalt: false,
            strict_phase_timeout: false,
            readiness_file: PathBuf::from("/tmp/suspend_active"),
            wakelock_probe_path: PathBuf::from("/sys/power/wake_lock"),
            power_state_path: PathBuf::from("/sys/power/state"),
            time_save_path: PathBuf::from("/var/lib/slumberd/time_saved"),
            token_dir: PathBuf::from("/dev/tokens"),
            charge_bypass_pin: PathBuf::from("/sys/user_hw/pins/power/chg_bypass/level"),
            socket_path: PathBuf::from("/run/slumberd.sock"),
        }
    }
}

/// Load configuration from an optional TOML file plus environment overrides
pub fn load(path: Option<&Path>) -> SleepResult<SleepConfig> {
    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None => SleepConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

fn load_from_file(path: &Path) -> SleepResult<SleepConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SleepError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    toml::from_str(&content)
        .map_err(|e| SleepError::Config(format!("cannot parse {}: {}", path.display(), e)))
}

fn apply_env_overrides(config: &mut SleepConfig) -> SleepResult<()> {
    override_u64(&mut config.wait_idle_ms, "WAIT_IDLE_MS")?;
    override_u64(&mut config.wait_idle_granularity_ms, "WAIT_IDLE_GRANULARITY_MS")?;
    override_u64(&mut config.wait_suspend_response_ms, "WAIT_SUSPEND_RESPONSE_MS")?;
    override_u64(&mut config.wait_prepare_suspend_ms, "WAIT_PREPARE_SUSPEND_MS")?;
    override_u64(&mut config.after_resume_idle_ms, "AFTER_RESUME_IDLE_MS")?;
    override_u64(&mut config.wait_alarms_s, "WAIT_ALARMS_S")?;
    override_bool(&mut config.suspend_with_charger, "SUSPEND_WITH_CHARGER")?;
    override_bool(&mut config.fasthalt, "FASTHALT")?;
    override_bool(&mut config.strict_phase_timeout, "STRICT_PHASE_TIMEOUT")?;
    override_path(&mut config.readiness_file, "READINESS_FILE");
    override_path(&mut config.wakelock_probe_path, "WAKELOCK_PROBE_PATH");
    override_path(&mut config.power_state_path, "POWER_STATE_PATH");
    override_path(&mut config.time_save_path, "TIME_SAVE_PATH");
    override_path(&mut config.token_dir, "TOKEN_DIR");
    override_path(&mut config.charge_bypass_pin, "CHARGE_BYPASS_PIN");
    override_path(&mut config.socket_path, "SOCKET_PATH");
    Ok(())
}

fn override_u64(slot: &mut u64, name: &str) -> SleepResult<()> {
    if let Ok(raw) = std::env::var(format!("{}{}", ENV_PREFIX, name)) {
        *slot = raw.parse().map_err(|_| {
            SleepError::Config(format!("{}{} is not an integer: {}", ENV_PREFIX, name, raw))
        })?;
    }
    Ok(())
}

fn override_bool(slot: &mut bool, name: &str) -> SleepResult<()> {
    if let Ok(raw) = std::env::var(format!("{}{}", ENV_PREFIX, name)) {
        *slot = raw.parse().map_err(|_| {
            SleepError::Config(format!(
                "{}{} is not true/false: {}",
                ENV_PREFIX, name, raw
            ))
        })?;
    }
    Ok(())
}

fn override_path(slot: &mut PathBuf, name: &str) {
    if let Ok(raw) = std::env::var(format!("{}{}", ENV_PREFIX, name)) {
        *slot = PathBuf::from(raw);
    }
}

fn validate(config: &SleepConfig) -> SleepResult<()> {
    if config.wait_idle_ms == 0 {
        return Err(SleepError::Config("wait_idle_ms must be > 0".to_string()));
    }
    if config.wait_idle_granularity_ms == 0 {
        return Err(SleepError::Config(
            "wait_idle_granularity_ms must be > 0".to_string(),
        ));
    }
    if config.wait_suspend_response_ms == 0 || config.wait_prepare_suspend_ms == 0 {
        return Err(SleepError::Config(
            "phase timeouts must be > 0".to_string(),
        ));
    }
    Ok(())
}
