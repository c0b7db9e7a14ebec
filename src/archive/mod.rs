//! # Archive Format
//!
//! This module defines the on-disk records of a `.spk` archive and the byte-level
//! helpers they share. The stream layout is strictly sequential:
//!
//! 1.  **ArchiveHeader**: magic, format version, flags, creation time. Written once.
//! 2.  Per entry, in enumeration order, either
//!     - a **DirectoryHeader**, or
//!     - a **FileHeader** followed by zero or more (**GlobHeader**, payload) pairs whose
//!       original sizes add up to the file size.
//!
//! All integers are little-endian. Every entry record starts with a four byte signature so a
//! reader can tell what comes next without any index.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{ArchiveError, Result};

mod directory;
mod file;
mod glob;
mod header;

pub use directory::DirectoryHeader;
pub use file::{FileHeader, FILE_FLAG_HASHED};
pub use glob::GlobHeader;
pub use header::{ArchiveHeader, ARCHIVE_MAGIC, FORMAT_VERSION};

/// Longest relative path accepted in an entry header.
pub const MAX_PATH_LEN: u32 = 4096;

/// Upper bound for a single glob's original or stored size.
pub const MAX_GLOB_SIZE: u32 = 64 * 1024 * 1024;

/// What the next record in the stream is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Glob,
}

impl EntryKind {
    fn from_signature(sig: &[u8; 4]) -> Option<Self> {
        match sig {
            s if s == DirectoryHeader::SIGNATURE => Some(EntryKind::Directory),
            s if s == FileHeader::SIGNATURE => Some(EntryKind::File),
            s if s == GlobHeader::SIGNATURE => Some(EntryKind::Glob),
            _ => None,
        }
    }
}

/// Looks at the next record signature without consuming it.
///
/// Returns `Ok(None)` on a clean end of stream. A partial or unknown signature is reported
/// as corruption.
pub fn peek_entry<R: Read + Seek>(reader: &mut R) -> Result<Option<EntryKind>> {
    let offset = stream_offset(reader);
    let mut sig = [0u8; 4];
    let mut filled = 0;
    while filled < sig.len() {
        match reader.read(&mut sig[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ArchiveError::ArchiveRead { offset, source: e }),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    if filled < sig.len() {
        return Err(ArchiveError::corrupt(offset, "truncated entry signature"));
    }
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| ArchiveError::ArchiveRead { offset, source: e })?;
    EntryKind::from_signature(&sig)
        .map(Some)
        .ok_or_else(|| ArchiveError::corrupt(offset, format!("unknown entry signature {:02x?}", sig)))
}

// --- byte helpers -----------------------------------------------------------

pub(crate) fn stream_offset<S: Seek>(s: &mut S) -> u64 {
    s.stream_position().unwrap_or(0)
}

pub(crate) fn read_array<R: Read + Seek, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let offset = stream_offset(reader);
    let mut buf = [0u8; N];
    read_exact_mapped(reader, &mut buf, offset)?;
    Ok(buf)
}

pub(crate) fn read_exact_mapped<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ArchiveError::corrupt(offset, "unexpected end of archive")
        } else {
            ArchiveError::ArchiveRead { offset, source: e }
        }
    })
}

pub(crate) fn read_u16<R: Read + Seek>(reader: &mut R) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array(reader)?))
}

pub(crate) fn read_u32<R: Read + Seek>(reader: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

pub(crate) fn read_u64<R: Read + Seek>(reader: &mut R) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(reader)?))
}

pub(crate) fn read_i64<R: Read + Seek>(reader: &mut R) -> Result<i64> {
    Ok(i64::from_le_bytes(read_array(reader)?))
}

/// Reads `len` bytes of `/`-separated relative path, rejecting anything that could escape
/// the destination root.
pub(crate) fn read_path<R: Read + Seek>(reader: &mut R, len: u32) -> Result<String> {
    let offset = stream_offset(reader);
    if len == 0 || len > MAX_PATH_LEN {
        return Err(ArchiveError::corrupt(offset, format!("implausible path length {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    read_exact_mapped(reader, &mut buf, offset)?;
    let path = String::from_utf8(buf).map_err(|_| ArchiveError::corrupt(offset, "entry path is not UTF-8"))?;
    if !is_safe_relative(&path) {
        return Err(ArchiveError::corrupt(offset, format!("unsafe entry path '{path}'")));
    }
    Ok(path)
}

/// True for non-empty, relative, `/`-separated paths without `.`/`..` segments.
pub(crate) fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.contains('\0')
        && path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

pub(crate) fn check_path_len(path: &str) -> Result<u32> {
    let len = path.len() as u32;
    if path.len() > MAX_PATH_LEN as usize || !is_safe_relative(path) {
        return Err(ArchiveError::InvalidPath(path.to_string()));
    }
    Ok(len)
}

/// Writes a whole record. Any failure here is an archive medium failure.
pub(crate) fn write_record<W: Write + Seek>(writer: &mut W, bytes: &[u8]) -> Result<usize> {
    let offset = stream_offset(writer);
    writer
        .write_all(bytes)
        .map_err(|e| ArchiveError::ArchiveWrite { offset, source: e })?;
    Ok(bytes.len())
}
