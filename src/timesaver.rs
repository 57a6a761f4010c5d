//! Wall-clock persistence
//!
//! On entry to sleep the current wall clock is written to disk so the system
//! clock can be restored after a battery pull. Write-then-rename keeps the
//! saved value intact if power is lost mid-write.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::clock;
use crate::error::{SleepError, SleepResult};

pub struct TimeSaver {
    path: PathBuf,
}

impl TimeSaver {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Persist the current wall clock
    pub fn save(&self) -> SleepResult<()> {
        let now = clock::now_wall();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(SleepError::TimeSave)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, format!("{}\n", now.timestamp())).map_err(SleepError::TimeSave)?;
        fs::rename(&tmp, &self.path).map_err(SleepError::TimeSave)?;
        debug!(path = %self.path.display(), epoch = now.timestamp(), "saved wall clock");
        Ok(())
    }

    /// The last persisted wall clock, if any
    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let epoch: i64 = raw.trim().parse().ok()?;
        Utc.timestamp_opt(epoch, 0).single()
    }
}
