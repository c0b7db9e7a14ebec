use std::io::{Read, Seek, Write};

use serde::{Deserialize, Serialize};

use super::{check_path_len, read_array, read_i64, read_path, read_u32, stream_offset, write_record};
use crate::error::{ArchiveError, Result};

/// One directory entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirectoryHeader {
    /// Root-relative, `/`-separated path.
    pub relative_path: String,
    pub permissions: u32,
    pub mtime: i64,
}

impl DirectoryHeader {
    pub const SIGNATURE: &'static [u8; 4] = b"SPDH";

    pub fn new(relative_path: impl Into<String>, permissions: u32, mtime: i64) -> Self {
        Self { relative_path: relative_path.into(), permissions, mtime }
    }

    pub fn write_to_archive<W: Write + Seek>(&self, writer: &mut W) -> Result<usize> {
        let path_len = check_path_len(&self.relative_path)?;
        let mut buf = Vec::with_capacity(20 + self.relative_path.len());
        buf.extend_from_slice(Self::SIGNATURE);
        buf.extend_from_slice(&self.permissions.to_le_bytes());
        buf.extend_from_slice(&self.mtime.to_le_bytes());
        buf.extend_from_slice(&path_len.to_le_bytes());
        buf.extend_from_slice(self.relative_path.as_bytes());
        write_record(writer, &buf)
    }

    /// Directories carry no payload, so there is nothing to skip.
    pub fn read_from_archive<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let offset = stream_offset(reader);
        let sig: [u8; 4] = read_array(reader)?;
        if &sig != Self::SIGNATURE {
            return Err(ArchiveError::corrupt(offset, "expected directory header"));
        }
        let permissions = read_u32(reader)?;
        let mtime = read_i64(reader)?;
        let len = read_u32(reader)?;
        let relative_path = read_path(reader, len)?;
        Ok(Self { relative_path, permissions, mtime })
    }
}
