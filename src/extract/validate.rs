use std::io::{Read, Seek};

use crate::archive::{stream_offset, FileHeader, GlobHeader};
use crate::error::{ArchiveError, Result};
use crate::failure::FailureCause;
use crate::state::ExpandState;

/// Read-only integrity walk over one file's glob chain.
///
/// Each glob's checksum is verified; the first mismatch is recorded for the file and the
/// remaining globs of that file are only skipped over. Nothing is written to disk. Follows the
/// same budget and resume rules as extraction.
pub fn standard_validate_file_entry<R: Read + Seek>(state: &mut ExpandState, archive: &mut R, header: &FileHeader) -> Result<()> {
    let subject = header.relative_path.as_str();
    while state.current_file_offset < header.file_size && !state.timed_out() {
        let already_failed = state.failures.has_failure_for(subject);
        let glob = GlobHeader::read_from_archive(archive, already_failed)?;
        let remaining = header.file_size - state.current_file_offset;
        if glob.original_size as u64 > remaining || glob.original_size == 0 {
            return Err(ArchiveError::corrupt(
                stream_offset(archive),
                format!("glob of {} bytes does not fit '{subject}'", glob.original_size),
            ));
        }
        if !already_failed {
            match glob.read_content(archive, true) {
                Ok(_) => {}
                Err(ArchiveError::HashMismatch { expected, actual, .. }) => state.failures.add_file(
                    FailureCause::HashMismatch,
                    subject,
                    format!(
                        "glob at file offset {} has crc {actual}, expected {expected}",
                        state.current_file_offset
                    ),
                ),
                Err(e @ (ArchiveError::Codec(_) | ArchiveError::UnknownCodec(_))) => {
                    state.failures.add_file(FailureCause::ArchiveCorrupt, subject, e.to_string())
                }
                Err(e) => return Err(e),
            }
        }
        state.current_file_offset += glob.original_size as u64;
        let last = state.archive_offset;
        state.archive_offset =
            archive.stream_position().map_err(|e| ArchiveError::ArchiveRead { offset: last, source: e })?;
        state.record_unit();
    }

    if state.current_file_offset >= header.file_size {
        if header.file_size == 0 {
            state.record_unit();
        }
        state.file_write_count += 1;
        state.reset_file_cursor();
    }
    Ok(())
}
