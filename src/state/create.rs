use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{load_json, save_json, SliceClock, TimeBudget};
use crate::archive::MAX_GLOB_SIZE;
use crate::compress::CodecKind;
use crate::error::Result;
use crate::failure::FailureLog;

pub const DEFAULT_GLOB_SIZE: u32 = 1024 * 1024;

/// Knobs for a build.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    /// Maximum original bytes per glob, clamped to `1..=MAX_GLOB_SIZE`.
    pub glob_size: u32,
    /// Voluntary sleep before each glob, in microseconds.
    pub throttle_delay_us: u64,
    pub budget: TimeBudget,
    pub codec: CodecKind,
    /// Compute a whole-file blake3 hash for every file header.
    pub hash_files: bool,
    /// Reserve a manifest entry at the start and fill it in on completion.
    pub write_manifest: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            glob_size: DEFAULT_GLOB_SIZE,
            throttle_delay_us: 0,
            budget: TimeBudget::Unlimited,
            codec: CodecKind::Identity,
            hash_files: true,
            write_manifest: true,
        }
    }
}

/// How far a build has progressed.
///
/// (`current_file_index`, `current_file_offset`, `archive_offset`) pin the resume point:
/// the archive is truncated back to `archive_offset` and the entry at `current_file_index`
/// continues from `current_file_offset`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateState {
    pub archive_offset: u64,
    pub current_file_index: usize,
    pub current_file_offset: u64,
    /// Size recorded in the header of the file being written. `Some` once that header is in
    /// the archive, which is what makes a resume skip rewriting it.
    pub current_file_size: Option<u64>,
    pub glob_size: u32,
    pub throttle_delay_us: u64,
    pub budget: TimeBudget,
    pub codec: CodecKind,
    pub hash_files: bool,
    pub write_manifest: bool,
    pub failures: FailureLog,
    pub skipped_file_count: u64,
    pub archived_file_count: u64,
    pub archived_directory_count: u64,
    /// Offset of the reserved manifest entry.
    pub manifest_offset: Option<u64>,
    pub header_written: bool,
    pub is_done: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip)]
    clock: Option<SliceClock>,
}

impl CreateState {
    pub fn new(options: CreateOptions) -> Self {
        Self {
            archive_offset: 0,
            current_file_index: 0,
            current_file_offset: 0,
            current_file_size: None,
            glob_size: options.glob_size.clamp(1, MAX_GLOB_SIZE),
            throttle_delay_us: options.throttle_delay_us,
            budget: options.budget,
            codec: options.codec,
            hash_files: options.hash_files,
            write_manifest: options.write_manifest,
            failures: FailureLog::new(),
            skipped_file_count: 0,
            archived_file_count: 0,
            archived_directory_count: 0,
            manifest_offset: None,
            header_written: false,
            is_done: false,
            started_at: chrono::Utc::now(),
            clock: None,
        }
    }

    /// Starts the clock for this invocation.
    pub fn start_slice(&mut self) {
        self.clock = Some(SliceClock::start(self.budget));
    }

    pub fn timed_out(&self) -> bool {
        self.clock.map(|c| c.timed_out()).unwrap_or(false)
    }

    pub(crate) fn record_unit(&mut self) {
        if let Some(clock) = self.clock.as_mut() {
            clock.record_unit();
        }
    }

    /// Moves the cursor to the next entry.
    pub(crate) fn next_entry(&mut self) {
        self.current_file_index += 1;
        self.current_file_offset = 0;
        self.current_file_size = None;
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}
