//! Filesystem collaborators: sysfs attributes, hardware tokens, sentinels

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{SleepError, SleepResult};

/// Write a value to a sysfs attribute
pub fn write_string(path: &Path, value: &str) -> SleepResult<()> {
    fs::write(path, value).map_err(|source| SleepError::Sysfs {
        path: path.display().to_string(),
        source,
    })?;
    debug!(path = %path.display(), value, "sysfs write");
    Ok(())
}

/// Read a hardware token from the token directory
pub fn read_token(token_dir: &Path, name: &str) -> SleepResult<String> {
    let path = token_dir.join(name);
    let raw = fs::read_to_string(&path).map_err(|source| SleepError::Token {
        name: name.to_string(),
        source,
    })?;
    Ok(raw.trim_end_matches(['\n', '\0']).to_string())
}

/// Whether the boot-complete sentinel is present
///
/// The file's mere existence is the signal that the system is booted far
/// enough to permit suspend activity.
pub fn readiness_present(path: &Path) -> bool {
    path.exists()
}

/// Whether the kernel exposes wakelocks
///
/// Probed once at init: the well-known path must exist and be a regular file.
pub fn wakelock_support(probe_path: &Path) -> bool {
    fs::metadata(probe_path)
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
