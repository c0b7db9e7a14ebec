//! # Archive Build
//!
//! Each call to [`run_build_slice`] opens the archive, continues from the cursor in
//! [`CreateState`], and returns once the budget is used up or every entry is written. No
//! handle survives a call; a file that spans several calls is reopened and seeked each time.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::archive::{check_path_len, stream_offset, ArchiveHeader, DirectoryHeader, FileHeader, GlobHeader, FORMAT_VERSION};
use crate::common::{ScanEntry, ScanList};
use crate::compress::CodecKind;
use crate::error::{ArchiveError, Result};
use crate::failure::FailureCause;
use crate::fsx;
use crate::state::{CreateState, SliceOutcome};

/// Relative path of the synthetic manifest entry.
pub const MANIFEST_PATH: &str = ".sitepack/manifest.json";
/// Bytes reserved for the manifest payload.
pub const MANIFEST_RESERVED_SIZE: u32 = 4096;

/// Summary written into the archive when the build completes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub format_version: u16,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub finished: bool,
    pub file_count: u64,
    pub directory_count: u64,
    pub skipped_file_count: u64,
    pub failure_count: u64,
    pub glob_size: u32,
    pub codec: CodecKind,
}

impl Manifest {
    fn from_state(state: &CreateState, finished: bool) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            created_at: state.started_at,
            finished,
            file_count: state.archived_file_count,
            directory_count: state.archived_directory_count,
            skipped_file_count: state.skipped_file_count,
            failure_count: state.failures.len() as u64,
            glob_size: state.glob_size,
            codec: state.codec,
        }
    }
}

fn position<S: Seek>(archive: &mut S, last_known: u64) -> Result<u64> {
    archive
        .stream_position()
        .map_err(|e| ArchiveError::ArchiveWrite { offset: last_known, source: e })
}

/// Writes the archive header. Only valid on an empty archive.
pub fn start_archive<W: Write + Seek>(state: &mut CreateState, archive: &mut W) -> Result<()> {
    ArchiveHeader::new(state.codec).write_to_archive(archive)?;
    state.archive_offset = position(archive, 0)?;
    state.header_written = true;
    Ok(())
}

/// Records an unreadable source and moves on to the next entry.
fn skip_source(state: &mut CreateState, relative_path: &str, err: io::Error) {
    state
        .failures
        .add_file(FailureCause::SourceUnreadable, relative_path, format!("cannot read source: {err}"));
    state.skipped_file_count += 1;
    state.record_unit();
    state.next_entry();
}

/// Records a file whose header is already out but whose content cannot be read in full.
/// One record per file, however many invocations it spans.
fn note_degraded(state: &mut CreateState, relative_path: &str, description: String) {
    if !state.failures.has_failure_for(relative_path) {
        state.failures.add_file(FailureCause::SourceUnreadable, relative_path, description);
    }
}

fn hash_source(source: &mut File) -> io::Result<[u8; 32]> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    source.seek(SeekFrom::Start(0))?;
    Ok(*hasher.finalize().as_bytes())
}

/// Reads until `buf` is full or the source ends.
fn read_full(source: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writes a directory entry and advances the cursor.
pub fn write_directory_to_archive<W: Write + Seek>(state: &mut CreateState, archive: &mut W, entry: &ScanEntry) -> Result<()> {
    DirectoryHeader::new(entry.relative_path.clone(), entry.permissions, entry.mtime).write_to_archive(archive)?;
    state.archive_offset = position(archive, state.archive_offset)?;
    state.archived_directory_count += 1;
    state.record_unit();
    state.next_entry();
    Ok(())
}

/// Writes as much of one source file as the budget allows.
///
/// The file header is written the first time the file is visited; later visits seek the
/// source to `current_file_offset` and append globs. An unreadable source is recorded and
/// skipped. If the source shrinks or fails after its header is out, the remaining bytes are
/// zero-filled so the archive stays well-formed, and the file is recorded as unreadable.
pub fn write_file_portion_to_archive<W: Write + Seek>(
    state: &mut CreateState,
    archive: &mut W,
    source_path: &Path,
    relative_path: &str,
) -> Result<()> {
    let resuming = state.current_file_size.is_some();
    let mut source = match File::open(source_path) {
        Ok(f) => Some(f),
        Err(e) if !resuming => {
            skip_source(state, relative_path, e);
            return Ok(());
        }
        Err(e) => {
            note_degraded(state, relative_path, format!("source vanished mid-file, zero-filling: {e}"));
            None
        }
    };

    let file_size = match state.current_file_size {
        Some(size) => {
            if let Some(src) = source.as_mut() {
                if let Err(e) = src.seek(SeekFrom::Start(state.current_file_offset)) {
                    note_degraded(state, relative_path, format!("cannot seek source, zero-filling: {e}"));
                    source = None;
                }
            }
            debug!(path = relative_path, offset = state.current_file_offset, "resuming file");
            size
        }
        None => {
            let Some(src) = source.as_mut() else {
                return Ok(());
            };
            let meta = match src.metadata() {
                Ok(m) => m,
                Err(e) => {
                    skip_source(state, relative_path, e);
                    return Ok(());
                }
            };
            let hash = if state.hash_files {
                match hash_source(src) {
                    Ok(h) => Some(h),
                    Err(e) => {
                        skip_source(state, relative_path, e);
                        return Ok(());
                    }
                }
            } else {
                None
            };
            let header = FileHeader::new(relative_path, meta.len(), fsx::mtime_secs(&meta), fsx::unix_mode(&meta), hash);
            header.write_to_archive(archive)?;
            state.archive_offset = position(archive, state.archive_offset)?;
            state.current_file_size = Some(header.file_size);
            state.current_file_offset = 0;
            debug!(path = relative_path, size = header.file_size, "file header written");
            header.file_size
        }
    };

    let codec = state.codec.codec();
    let glob_size = state.glob_size as u64;
    let mut buf = vec![0u8; glob_size.min(file_size.max(1)) as usize];
    let mut short_read_recorded = false;

    while state.current_file_offset < file_size && !state.timed_out() {
        if state.throttle_delay_us > 0 {
            std::thread::sleep(Duration::from_micros(state.throttle_delay_us));
        }
        let want = glob_size.min(file_size - state.current_file_offset) as usize;
        let chunk = &mut buf[..want];
        let read = source.as_mut().map(|src| read_full(src, chunk));
        let got = match read {
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                note_degraded(state, relative_path, format!("read failed, zero-filling: {e}"));
                short_read_recorded = true;
                source = None;
                0
            }
            None => 0,
        };
        if got < want {
            chunk[got..].fill(0);
            if source.is_some() && !short_read_recorded {
                note_degraded(state, relative_path, "source shrank while archiving, zero-filling".to_string());
                short_read_recorded = true;
            }
        }

        let mut glob = GlobHeader::default();
        glob.set_hash(chunk);
        let stored = glob.content_to_write(chunk, codec.as_ref())?;
        glob.write_to_archive(archive)?;
        let payload_offset = stream_offset(archive);
        archive
            .write_all(&stored)
            .map_err(|e| ArchiveError::ArchiveWrite { offset: payload_offset, source: e })?;

        state.current_file_offset += want as u64;
        state.archive_offset = position(archive, state.archive_offset)?;
        state.record_unit();
    }

    if state.current_file_offset >= file_size {
        if file_size == 0 {
            state.record_unit();
        }
        debug!(path = relative_path, "file complete");
        state.archived_file_count += 1;
        state.next_entry();
    }
    Ok(())
}

/// Writes `content` as a complete file entry holding a single glob.
///
/// With `reserved`, the stored payload is zero-padded to exactly that many bytes so the entry
/// can later be replaced in place by [`rewrite_buffer_in_archive`]. Returns the offset of the
/// entry. The scan cursor is not touched.
pub fn write_buffer_to_archive<W: Write + Seek>(
    state: &mut CreateState,
    archive: &mut W,
    relative_path: &str,
    content: &[u8],
    reserved: Option<u32>,
) -> Result<u64> {
    let entry_offset = position(archive, state.archive_offset)?;
    write_buffer_entry(archive, relative_path, content, reserved, state.codec)?;
    state.archive_offset = position(archive, entry_offset)?;
    Ok(entry_offset)
}

fn write_buffer_entry<W: Write + Seek>(
    archive: &mut W,
    relative_path: &str,
    content: &[u8],
    reserved: Option<u32>,
    codec: CodecKind,
) -> Result<()> {
    match reserved {
        Some(_) if content.is_empty() => {
            return Err(ArchiveError::Codec("cannot reserve space for an empty buffer".into()));
        }
        Some(size) if content.len() > size as usize => {
            return Err(ArchiveError::Codec(format!("{} bytes do not fit the {size} bytes reserved", content.len())));
        }
        _ => {}
    }
    let header = FileHeader::new(
        relative_path,
        content.len() as u64,
        chrono::Utc::now().timestamp(),
        0o644,
        Some(*blake3::hash(content).as_bytes()),
    );
    header.write_to_archive(archive)?;
    if content.is_empty() {
        return Ok(());
    }
    let mut glob = GlobHeader::default();
    glob.set_hash(content);
    let stored = match reserved {
        Some(size) => glob.padded_content_to_write(content, size)?,
        None => glob.content_to_write(content, codec.codec().as_ref())?,
    };
    glob.write_to_archive(archive)?;
    let payload_offset = stream_offset(archive);
    archive
        .write_all(&stored)
        .map_err(|e| ArchiveError::ArchiveWrite { offset: payload_offset, source: e })?;
    Ok(())
}

/// Replaces a padded buffer entry written by [`write_buffer_to_archive`] without moving any
/// byte after it. The stream position is restored afterwards.
pub fn rewrite_buffer_in_archive<A: Read + Write + Seek>(archive: &mut A, entry_offset: u64, content: &[u8]) -> Result<()> {
    let resume_at = stream_offset(archive);
    archive
        .seek(SeekFrom::Start(entry_offset))
        .map_err(|e| ArchiveError::ArchiveRead { offset: entry_offset, source: e })?;
    let old = FileHeader::read_from_archive(archive, false)?;
    let glob = GlobHeader::read_from_archive(archive, false)?;
    if old.file_size != glob.original_size as u64 {
        return Err(ArchiveError::corrupt(entry_offset, format!("'{}' is not a single-glob entry", old.relative_path)));
    }
    archive
        .seek(SeekFrom::Start(entry_offset))
        .map_err(|e| ArchiveError::ArchiveWrite { offset: entry_offset, source: e })?;
    write_buffer_entry(archive, &old.relative_path, content, Some(glob.stored_size), CodecKind::Identity)?;
    archive
        .seek(SeekFrom::Start(resume_at))
        .map_err(|e| ArchiveError::ArchiveWrite { offset: resume_at, source: e })?;
    Ok(())
}

fn open_archive(state: &CreateState, archive_path: &Path) -> Result<File> {
    let opened = if state.header_written {
        OpenOptions::new().read(true).write(true).open(archive_path)
    } else {
        OpenOptions::new().read(true).write(true).create(true).truncate(true).open(archive_path)
    };
    let mut archive = opened.map_err(|e| ArchiveError::ArchiveWrite { offset: state.archive_offset, source: e })?;
    if state.header_written {
        // Bytes past the checkpoint belong to an invocation that never saved its state.
        archive
            .set_len(state.archive_offset)
            .and_then(|_| archive.seek(SeekFrom::Start(state.archive_offset)))
            .map_err(|e| ArchiveError::ArchiveWrite { offset: state.archive_offset, source: e })?;
    }
    Ok(archive)
}

/// Runs one invocation of the build.
///
/// Fatal errors leave `state` at a consistent point; saving it and calling again retries.
pub fn run_build_slice(state: &mut CreateState, archive_path: &Path, scan: &ScanList) -> Result<SliceOutcome> {
    if state.is_done {
        return Ok(SliceOutcome::Complete);
    }
    state.start_slice();
    let mut archive = open_archive(state, archive_path)?;

    if !state.header_written {
        info!(archive = %archive_path.display(), entries = scan.entries.len(), "starting build");
        start_archive(state, &mut archive)?;
        if state.write_manifest {
            let placeholder = serde_json::to_vec(&Manifest::from_state(state, false))?;
            let offset = write_buffer_to_archive(state, &mut archive, MANIFEST_PATH, &placeholder, Some(MANIFEST_RESERVED_SIZE))?;
            state.manifest_offset = Some(offset);
        }
    }

    while state.current_file_index < scan.entries.len() {
        if state.timed_out() {
            debug!(
                index = state.current_file_index,
                offset = state.current_file_offset,
                archive_offset = state.archive_offset,
                "build slice timed out"
            );
            archive
                .sync_data()
                .map_err(|e| ArchiveError::ArchiveWrite { offset: state.archive_offset, source: e })?;
            return Ok(SliceOutcome::InProgress);
        }
        let entry = &scan.entries[state.current_file_index];
        if let Err(e) = check_path_len(&entry.relative_path) {
            skip_source(state, &entry.relative_path, io::Error::new(io::ErrorKind::InvalidInput, e.to_string()));
            continue;
        }
        if entry.is_dir {
            write_directory_to_archive(state, &mut archive, entry)?;
        } else {
            write_file_portion_to_archive(state, &mut archive, &entry.source_path, &entry.relative_path)?;
        }
    }

    finalize_archive(state, &mut archive)?;
    info!(
        files = state.archived_file_count,
        directories = state.archived_directory_count,
        skipped = state.skipped_file_count,
        failures = state.failures.len(),
        "build complete"
    );
    Ok(SliceOutcome::Complete)
}

/// Fills in the manifest and flushes the archive.
pub fn finalize_archive(state: &mut CreateState, archive: &mut File) -> Result<()> {
    if let Some(offset) = state.manifest_offset {
        let manifest = serde_json::to_vec(&Manifest::from_state(state, true))?;
        rewrite_buffer_in_archive(archive, offset, &manifest)?;
    }
    archive
        .sync_all()
        .map_err(|e| ArchiveError::ArchiveWrite { offset: state.archive_offset, source: e })?;
    state.is_done = true;
    Ok(())
}
