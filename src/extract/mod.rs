//! # Extraction Module
//!
//! Restores an archive entry by entry. [`run_expand_slice`] is the driver: it reads records
//! from `archive_offset` on, hands directories to [`create_directory`] and files to
//! [`write_to_file`] (or to [`standard_validate_file_entry`] for a read-only check), and
//! returns when the budget runs out or the archive ends.
//!
//! Problems with a single entry are recorded in the state's failure list and the walk goes
//! on. Only a failure to read the archive itself aborts.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::archive::{peek_entry, stream_offset, ArchiveHeader, DirectoryHeader, EntryKind, FileHeader, GlobHeader};
use crate::create::{Manifest, MANIFEST_PATH};
use crate::error::{ArchiveError, Result};
use crate::failure::FailureCause;
use crate::fsx::{self as fs, OpenOptions};
use crate::state::{ExpandState, SliceOutcome, ValidationMode};

mod validate;

pub use validate::standard_validate_file_entry;

/// An entry as seen by [`list_entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListedEntry {
    Directory(DirectoryHeader),
    File(FileHeader),
}

/// Walks every header of an archive without touching payloads.
pub fn list_entries(archive_path: &Path) -> Result<(ArchiveHeader, Vec<ListedEntry>)> {
    let mut archive = File::open(archive_path).map_err(|e| ArchiveError::ArchiveRead { offset: 0, source: e })?;
    let header = ArchiveHeader::read_from_archive(&mut archive)?;
    let mut entries = Vec::new();
    while let Some(kind) = peek_entry(&mut archive)? {
        match kind {
            EntryKind::Directory => entries.push(ListedEntry::Directory(DirectoryHeader::read_from_archive(&mut archive)?)),
            EntryKind::File => entries.push(ListedEntry::File(FileHeader::read_from_archive(&mut archive, true)?)),
            EntryKind::Glob => return Err(ArchiveError::corrupt(stream_offset(&mut archive), "glob outside of a file entry")),
        }
    }
    Ok((header, entries))
}

fn position<S: Seek>(archive: &mut S, last_known: u64) -> Result<u64> {
    archive
        .stream_position()
        .map_err(|e| ArchiveError::ArchiveRead { offset: last_known, source: e })
}

/// Creates a directory entry at its mapped destination.
///
/// Failure is recorded, not returned: files below a missing directory fail on their own with
/// a more precise message.
pub fn create_directory(state: &mut ExpandState, header: &DirectoryHeader) {
    let dest = match state.mapper.resolve(&header.relative_path) {
        Ok(p) => p,
        Err(e) => {
            state
                .failures
                .add_directory(FailureCause::DirectoryCreateFailure, &header.relative_path, e.to_string());
            return;
        }
    };
    if let Err(e) = fs::create_dir_all(&dest) {
        state
            .failures
            .add_directory(FailureCause::DirectoryCreateFailure, &header.relative_path, format!("cannot create {}: {e}", dest.display()));
        return;
    }
    // the owner must still be able to fill the directory
    let mode = state.options.directory_mode_override.unwrap_or(header.permissions | 0o700);
    if let Err(e) = fs::set_unix_permissions(&dest, mode) {
        state
            .failures
            .add_directory(FailureCause::DirectoryCreateFailure, &header.relative_path, format!("cannot set mode {mode:o}: {e}"));
        return;
    }
    state.directory_write_count += 1;
}

fn ensure_parent(state: &ExpandState, dest: &Path) -> io::Result<()> {
    let Some(parent) = dest.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(parent)?;
    if let Some(mode) = state.options.directory_mode_override {
        fs::set_unix_permissions(parent, mode)?;
    }
    Ok(())
}

/// Moves the archive past the remaining globs of the current file without writing anything.
fn skip_remaining_globs<R: Read + Seek>(state: &mut ExpandState, archive: &mut R, header: &FileHeader) -> Result<()> {
    while state.current_file_offset < header.file_size {
        let glob = GlobHeader::read_from_archive(archive, true)?;
        if glob.original_size == 0 {
            return Err(ArchiveError::corrupt(stream_offset(archive), "empty glob"));
        }
        state.current_file_offset += glob.original_size as u64;
    }
    state.archive_offset = position(archive, state.archive_offset)?;
    state.reset_file_cursor();
    Ok(())
}

fn hash_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut f = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(*hasher.finalize().as_bytes())
}

/// Shared tail of every path on which a file entry completes.
fn finish_file(state: &mut ExpandState, dest: &Path, header: &FileHeader) {
    if !state.options.validate_only {
        // mtime first: setting it needs write access the new mode may take away
        if state.options.keep_file_time {
            if let Err(e) = fs::set_mtime(dest, header.mtime) {
                warn!(path = %dest.display(), "cannot restore mtime: {}", e);
            }
        }
        if let Some(mode) = state.options.file_mode_override {
            if let Err(e) = fs::set_unix_permissions(dest, mode) {
                warn!(path = %dest.display(), "cannot set mode {:o}: {}", mode, e);
            }
        }
    }
    state.file_write_count += 1;
    state.reset_file_cursor();
    state.record_unit();
}

/// Writes as much of the current file as the budget allows.
///
/// Expects `archive` positioned at the file's next glob (`archive_offset`). A fresh file is
/// created truncated; a resumed one is reopened, cut back to `current_file_offset` and
/// appended to.
pub fn write_to_file<R: Read + Seek>(state: &mut ExpandState, archive: &mut R, header: &FileHeader) -> Result<()> {
    let subject = header.relative_path.as_str();
    let dest = match state.destination_for(subject) {
        Ok(p) => p,
        Err(e) => {
            state.failures.add_file(FailureCause::DestinationUnwritable, subject, e.to_string());
            return skip_remaining_globs(state, archive, header);
        }
    };
    if header.file_size == 0 && state.options.validate_only {
        finish_file(state, &dest, header);
        return Ok(());
    }
    if let Err(e) = ensure_parent(state, &dest) {
        state
            .failures
            .add_file(FailureCause::DestinationUnwritable, subject, format!("cannot create parent of {}: {e}", dest.display()));
        return skip_remaining_globs(state, archive, header);
    }

    if header.file_size == 0 {
        // A stale file of the same name must not keep its old timestamp.
        match fs::remove_file(&dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %dest.display(), "could not remove before touch: {}", e),
        }
        if let Err(e) = File::create(&dest) {
            state
                .failures
                .add_file(FailureCause::DestinationUnwritable, subject, format!("cannot create {}: {e}", dest.display()));
            state.reset_file_cursor();
            state.record_unit();
            return Ok(());
        }
        finish_file(state, &dest, header);
        return Ok(());
    }

    let opened = if state.current_file_offset == 0 {
        File::create(&dest)
    } else {
        OpenOptions::new().read(true).write(true).open(&dest).and_then(|mut f| {
            f.set_len(state.current_file_offset)?;
            f.seek(SeekFrom::Start(state.current_file_offset))?;
            Ok(f)
        })
    };
    let mut out = match opened {
        Ok(f) => f,
        Err(e) => {
            state
                .failures
                .add_file(FailureCause::DestinationUnwritable, subject, format!("cannot open {}: {e}", dest.display()));
            return skip_remaining_globs(state, archive, header);
        }
    };

    let verify = state.options.validation_mode != ValidationMode::None;
    while state.current_file_offset < header.file_size && !state.timed_out() {
        let glob = GlobHeader::read_from_archive(archive, false)?;
        let remaining = header.file_size - state.current_file_offset;
        if glob.original_size as u64 > remaining || glob.original_size == 0 {
            return Err(ArchiveError::corrupt(
                state.archive_offset,
                format!("glob of {} bytes does not fit '{subject}'", glob.original_size),
            ));
        }
        let content = match glob.read_content(archive, false) {
            Ok(c) => {
                if verify && !glob.matches(&c) && !state.failures.has_failure_for(subject) {
                    state.failures.add_file(
                        FailureCause::HashMismatch,
                        subject,
                        format!("glob at file offset {} failed its checksum", state.current_file_offset),
                    );
                }
                c
            }
            Err(e) if !e.is_fatal() && !matches!(e, ArchiveError::Corrupt { .. }) => {
                if !state.failures.has_failure_for(subject) {
                    state.failures.add_file(FailureCause::ArchiveCorrupt, subject, e.to_string());
                }
                vec![0u8; glob.original_size as usize]
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = out.write_all(&content) {
            state
                .failures
                .add_file(FailureCause::DestinationUnwritable, subject, format!("write to {} failed: {e}", dest.display()));
            state.current_file_offset += glob.original_size as u64;
            drop(out);
            return skip_remaining_globs(state, archive, header);
        }
        state.current_file_offset += glob.original_size as u64;
        state.archive_offset = position(archive, state.archive_offset)?;
        state.record_unit();
    }

    if state.current_file_offset < header.file_size {
        return Ok(());
    }

    if let Err(e) = out.flush() {
        state
            .failures
            .add_file(FailureCause::DestinationUnwritable, subject, format!("flush of {} failed: {e}", dest.display()));
    }
    drop(out);

    if state.options.validation_mode == ValidationMode::Full && header.has_hash() && !state.failures.has_failure_for(subject) {
        match hash_file(&dest) {
            Ok(actual) if actual == header.hash => {}
            Ok(actual) => state.failures.add_file(
                FailureCause::HashMismatch,
                subject,
                format!("file hash {} does not match archived {}", blake3::Hash::from(actual).to_hex(), header.hash_hex()),
            ),
            Err(e) => state
                .failures
                .add_file(FailureCause::DestinationUnwritable, subject, format!("cannot re-read {}: {e}", dest.display())),
        }
    }
    if state.options.validate_only {
        if let Err(e) = fs::remove_file(&dest) {
            warn!(path = %dest.display(), "cannot remove validation output: {}", e);
        }
    }
    finish_file(state, &dest, header);
    Ok(())
}

/// Reads the manifest entry into `state.manifest`. It is build metadata, not part of the site.
fn read_manifest<R: Read + Seek>(state: &mut ExpandState, archive: &mut R, header: &FileHeader) -> Result<()> {
    let verify = state.options.validation_mode != ValidationMode::None;
    let mut content = Vec::new();
    let mut intact = true;
    let mut read = 0u64;
    while read < header.file_size {
        let glob = GlobHeader::read_from_archive(archive, false)?;
        if glob.original_size == 0 || glob.original_size as u64 > header.file_size - read {
            return Err(ArchiveError::corrupt(stream_offset(archive), "manifest glob does not fit its entry"));
        }
        read += glob.original_size as u64;
        match glob.read_content(archive, verify && intact) {
            Ok(c) => content.extend_from_slice(&c),
            Err(e @ ArchiveError::HashMismatch { .. }) => {
                state.failures.add_file(FailureCause::HashMismatch, MANIFEST_PATH, e.to_string());
                intact = false;
            }
            Err(e @ (ArchiveError::Codec(_) | ArchiveError::UnknownCodec(_))) => {
                state.failures.add_file(FailureCause::ArchiveCorrupt, MANIFEST_PATH, e.to_string());
                intact = false;
            }
            Err(e) => return Err(e),
        }
    }
    state.archive_offset = position(archive, state.archive_offset)?;
    if intact {
        match serde_json::from_slice::<Manifest>(&content) {
            Ok(manifest) => {
                debug!(finished = manifest.finished, files = manifest.file_count, "archive manifest");
                state.manifest = Some(manifest);
            }
            Err(e) => warn!("archive manifest is unreadable: {}", e),
        }
    }
    state.reset_file_cursor();
    state.record_unit();
    Ok(())
}

/// Removes the validation scratch directory once the walk is over.
fn clear_scratch(state: &ExpandState) {
    let Some(dir) = state.scratch_dir() else {
        return;
    };
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), "cannot remove validation scratch: {}", e),
    }
}

/// Continues or validates the file in `state.current_file_header`.
fn process_current_file<R: Read + Seek>(state: &mut ExpandState, archive: &mut R, header: &FileHeader) -> Result<()> {
    if state.options.validate_only && state.options.validation_mode != ValidationMode::Full {
        standard_validate_file_entry(state, archive, header)
    } else {
        write_to_file(state, archive, header)
    }
}

fn open_archive(state: &mut ExpandState, archive_path: &Path) -> Result<File> {
    let mut archive =
        File::open(archive_path).map_err(|e| ArchiveError::ArchiveRead { offset: state.archive_offset, source: e })?;
    if state.archive_header.is_none() {
        let header = ArchiveHeader::read_from_archive(&mut archive)?;
        info!(
            archive = %archive_path.display(),
            version = header.version,
            created = header.creation_timestamp,
            "starting extract"
        );
        state.archive_offset = position(&mut archive, 0)?;
        state.archive_header = Some(header);
    } else {
        archive
            .seek(SeekFrom::Start(state.archive_offset))
            .map_err(|e| ArchiveError::ArchiveRead { offset: state.archive_offset, source: e })?;
    }
    Ok(archive)
}

/// Records a structural problem that makes the rest of the stream unreadable and ends the walk.
fn stop_on_corruption(state: &mut ExpandState, subject: &str, err: &ArchiveError) -> SliceOutcome {
    state.failures.add_file(FailureCause::ArchiveCorrupt, subject, err.to_string());
    state.reset_file_cursor();
    state.is_done = true;
    clear_scratch(state);
    SliceOutcome::Complete
}

/// Runs one invocation of the extract.
pub fn run_expand_slice(state: &mut ExpandState, archive_path: &Path) -> Result<SliceOutcome> {
    if state.is_done {
        return Ok(SliceOutcome::Complete);
    }
    state.start_slice();
    let mut archive = match open_archive(state, archive_path) {
        Ok(a) => a,
        Err(e @ ArchiveError::Corrupt { .. }) => return Ok(stop_on_corruption(state, "<archive header>", &e)),
        Err(e) => return Err(e),
    };

    loop {
        if let Some(header) = state.current_file_header.clone() {
            match process_current_file(state, &mut archive, &header) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => return Ok(stop_on_corruption(state, &header.relative_path, &e)),
            }
            if state.current_file_header.is_some() {
                debug!(
                    path = %header.relative_path,
                    offset = state.current_file_offset,
                    archive_offset = state.archive_offset,
                    "extract slice timed out mid-file"
                );
                return Ok(SliceOutcome::InProgress);
            }
            continue;
        }

        if state.timed_out() {
            return Ok(SliceOutcome::InProgress);
        }

        let kind = match peek_entry(&mut archive) {
            Ok(Some(kind)) => kind,
            Ok(None) => break,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(stop_on_corruption(state, "<entry>", &e)),
        };
        match kind {
            EntryKind::Directory => match DirectoryHeader::read_from_archive(&mut archive) {
                Ok(dir) => {
                    state.archive_offset = position(&mut archive, state.archive_offset)?;
                    if !state.options.validate_only {
                        create_directory(state, &dir);
                    }
                    state.record_unit();
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => return Ok(stop_on_corruption(state, "<directory>", &e)),
            },
            EntryKind::File => match FileHeader::read_from_archive(&mut archive, false) {
                Ok(file) => {
                    let entry_offset = state.archive_offset;
                    state.archive_offset = position(&mut archive, state.archive_offset)?;
                    // the builder only ever places the manifest first
                    if entry_offset == ArchiveHeader::SIZE as u64 && file.relative_path == MANIFEST_PATH {
                        match read_manifest(state, &mut archive, &file) {
                            Ok(()) => {}
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => return Ok(stop_on_corruption(state, MANIFEST_PATH, &e)),
                        }
                        continue;
                    }
                    debug!(path = %file.relative_path, size = file.file_size, "file entry");
                    state.current_file_offset = 0;
                    state.current_file_header = Some(file);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => return Ok(stop_on_corruption(state, "<file>", &e)),
            },
            EntryKind::Glob => {
                let e = ArchiveError::corrupt(state.archive_offset, "glob outside of a file entry");
                return Ok(stop_on_corruption(state, "<glob>", &e));
            }
        }
    }

    state.is_done = true;
    clear_scratch(state);
    info!(
        files = state.file_write_count,
        directories = state.directory_write_count,
        failures = state.failures.len(),
        "extract complete"
    );
    Ok(SliceOutcome::Complete)
}
