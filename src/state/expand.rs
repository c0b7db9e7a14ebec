use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::{load_json, save_json, SliceClock, TimeBudget};
use crate::archive::{ArchiveHeader, FileHeader};
use crate::create::Manifest;
use crate::error::Result;
use crate::failure::FailureLog;
use crate::mapping::PathMapper;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// No checks beyond structural parsing.
    None,
    /// Verify each glob's crc32.
    #[default]
    Standard,
    /// Glob checks plus re-hashing each finished file against its whole-file hash.
    Full,
}

/// Knobs for an extract.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ExpandOptions {
    /// Mode for created directories. `None` restores the archived mode, owner bits kept open.
    pub directory_mode_override: Option<u32>,
    /// Mode for written files. `None` keeps what the filesystem gives them.
    pub file_mode_override: Option<u32>,
    /// Restore archived modification times on files.
    pub keep_file_time: bool,
    /// Check the archive without leaving anything on disk.
    ///
    /// Nothing is written below the mapper's destination. With [`ValidationMode::Full`] files
    /// are rebuilt in a private scratch directory, which is removed when the walk completes.
    pub validate_only: bool,
    pub validation_mode: ValidationMode,
    pub budget: TimeBudget,
}

/// How far an extract has progressed.
///
/// While a file is being written, `current_file_header` holds its header and
/// `archive_offset` points at its next glob.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExpandState {
    pub mapper: PathMapper,
    pub options: ExpandOptions,
    pub archive_header: Option<ArchiveHeader>,
    pub current_file_header: Option<FileHeader>,
    pub current_file_offset: u64,
    pub archive_offset: u64,
    pub failures: FailureLog,
    pub file_write_count: u64,
    pub directory_write_count: u64,
    pub is_done: bool,
    /// Build summary read from the archive's manifest entry, if it had one.
    #[serde(default)]
    pub manifest: Option<Manifest>,
    #[serde(default)]
    scratch_dir: Option<PathBuf>,
    #[serde(skip)]
    clock: Option<SliceClock>,
}

fn new_scratch_dir() -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let stamp = chrono::Utc::now().timestamp_micros();
    std::env::temp_dir().join(format!("sitepack-verify-{}-{stamp}-{seq}", std::process::id()))
}

impl ExpandState {
    pub fn new(mapper: PathMapper, options: ExpandOptions) -> Self {
        let scratch_dir = options.validate_only.then(new_scratch_dir);
        Self {
            mapper,
            options,
            archive_header: None,
            current_file_header: None,
            current_file_offset: 0,
            archive_offset: 0,
            failures: FailureLog::new(),
            file_write_count: 0,
            directory_write_count: 0,
            is_done: false,
            manifest: None,
            scratch_dir,
            clock: None,
        }
    }

    /// Where `relative_path` is written. Validation runs resolve into the scratch directory.
    pub fn destination_for(&self, relative_path: &str) -> Result<PathBuf> {
        match &self.scratch_dir {
            Some(dir) if self.options.validate_only => PathMapper::new(dir).resolve(relative_path),
            _ => self.mapper.resolve(relative_path),
        }
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }

    pub fn start_slice(&mut self) {
        self.clock = Some(SliceClock::start(self.options.budget));
    }

    pub fn timed_out(&self) -> bool {
        self.clock.map(|c| c.timed_out()).unwrap_or(false)
    }

    pub(crate) fn record_unit(&mut self) {
        if let Some(clock) = self.clock.as_mut() {
            clock.record_unit();
        }
    }

    /// Clears the per-file cursor once a file entry is fully consumed.
    pub(crate) fn reset_file_cursor(&mut self) {
        self.current_file_header = None;
        self.current_file_offset = 0;
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_load_keeps_current_header_and_mapping() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("extract.state.json");
        let mapper = PathMapper::new("/srv/site").with_rename("a.txt", "b.txt");
        let mut s = ExpandState::new(
            mapper.clone(),
            ExpandOptions { file_mode_override: Some(0o640), keep_file_time: true, ..Default::default() },
        );
        s.current_file_header = Some(FileHeader::new("a.txt", 10, 0, 0o644, None));
        s.current_file_offset = 4;
        s.archive_offset = 99;
        s.save(&path).unwrap();

        let back = ExpandState::load(&path).unwrap();
        assert_eq!(back.mapper, mapper);
        assert_eq!(back.options.file_mode_override, Some(0o640));
        assert!(back.options.keep_file_time);
        assert_eq!(back.current_file_header.as_ref().map(|h| h.relative_path.as_str()), Some("a.txt"));
        assert_eq!(back.current_file_offset, 4);
        assert_eq!(back.archive_offset, 99);
    }

    #[test]
    fn validation_resolves_into_scratch() {
        let s = ExpandState::new(
            PathMapper::new("/srv/site"),
            ExpandOptions { validate_only: true, validation_mode: ValidationMode::Full, ..Default::default() },
        );
        let scratch = s.scratch_dir().unwrap().to_path_buf();
        assert_eq!(s.destination_for("wp/index.php").unwrap(), scratch.join("wp/index.php"));

        let other = ExpandState::new(
            PathMapper::new("/srv/site"),
            ExpandOptions { validate_only: true, ..Default::default() },
        );
        assert_ne!(other.scratch_dir(), Some(scratch.as_path()));

        let plain = ExpandState::new(PathMapper::new("/srv/site"), ExpandOptions::default());
        assert!(plain.scratch_dir().is_none());
        assert_eq!(plain.destination_for("wp/index.php").unwrap(), PathBuf::from("/srv/site/wp/index.php"));
    }
}
