//! Persisted cursors for builds and extracts.
//!
//! A state is loaded at the start of every invocation, advanced by the processor, and saved
//! before the invocation returns. Everything needed to resume sits in serializable fields;
//! the per-invocation clock does not.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

mod create;
mod expand;

pub use create::{CreateOptions, CreateState, DEFAULT_GLOB_SIZE};
pub use expand::{ExpandOptions, ExpandState, ValidationMode};

/// How much work one invocation may do before it hands control back.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeBudget {
    /// Run until the whole archive is done.
    #[default]
    Unlimited,
    /// Wall-clock milliseconds per invocation.
    Millis(u64),
    /// Units of work per invocation. A unit is one glob, or one entry that has no globs.
    Units(u64),
}

impl TimeBudget {
    /// Pure timeout test. A slice that has not completed a unit yet is never timed out, so
    /// every invocation makes progress.
    pub fn is_exhausted(&self, started: Instant, now: Instant, units_done: u64) -> bool {
        if units_done == 0 {
            return false;
        }
        match *self {
            TimeBudget::Unlimited => false,
            TimeBudget::Millis(ms) => now.saturating_duration_since(started) >= Duration::from_millis(ms),
            TimeBudget::Units(n) => units_done >= n,
        }
    }
}

/// Clock of the invocation currently running.
#[derive(Debug, Clone, Copy)]
pub struct SliceClock {
    budget: TimeBudget,
    started: Instant,
    units: u64,
}

impl SliceClock {
    pub fn start(budget: TimeBudget) -> Self {
        Self { budget, started: Instant::now(), units: 0 }
    }

    pub fn record_unit(&mut self) {
        self.units += 1;
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn timed_out(&self) -> bool {
        self.budget.is_exhausted(self.started, Instant::now(), self.units)
    }
}

/// Result of one invocation of a build or extract driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    /// The budget ran out; call again with the saved state.
    InProgress,
    Complete,
}

/// Writes `value` as JSON next to `path` and renames it into place, so a kill mid-save keeps
/// the previous checkpoint intact.
pub(crate) fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    {
        let file = File::create(&tmp).map_err(|e| ArchiveError::io(e, &tmp))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush().map_err(|e| ArchiveError::io(e, &tmp))?;
        writer.get_ref().sync_all().map_err(|e| ArchiveError::io(e, &tmp))?;
    }
    fs::rename(&tmp, path).map_err(|e| ArchiveError::io(e, path))?;
    Ok(())
}

pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| ArchiveError::io(e, path))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
