use std::io::{Read, Seek, Write};

use serde::{Deserialize, Serialize};

use super::{read_array, read_i64, read_u16, stream_offset, write_record};
use crate::compress::CodecKind;
use crate::error::{ArchiveError, Result};

pub const ARCHIVE_MAGIC: &[u8; 8] = b"SITEPK01";
pub const FORMAT_VERSION: u16 = 1;

/// Represents the header of the archive, located at the beginning of the file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// The version of the archive format.
    pub version: u16,
    /// Low byte: id of the codec the builder used by default for globs.
    pub flags: u16,
    /// The Unix timestamp of when the archive was created.
    pub creation_timestamp: i64,
}

impl ArchiveHeader {
    pub const SIZE: usize = 8 + 2 + 2 + 8;

    pub fn new(codec: CodecKind) -> Self {
        Self {
            version: FORMAT_VERSION,
            flags: codec.id() as u16,
            creation_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Codec id recorded at build time. Individual globs still carry their own id.
    pub fn default_codec_id(&self) -> u8 {
        (self.flags & 0xff) as u8
    }

    pub fn write_to_archive<W: Write + Seek>(&self, writer: &mut W) -> Result<usize> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(ARCHIVE_MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.creation_timestamp.to_le_bytes());
        write_record(writer, &buf)
    }

    pub fn read_from_archive<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let offset = stream_offset(reader);
        let magic: [u8; 8] = read_array(reader)?;
        if &magic != ARCHIVE_MAGIC {
            return Err(ArchiveError::corrupt(offset, "not a sitepack archive (magic bytes mismatch)"));
        }
        let version = read_u16(reader)?;
        if version == 0 || version > FORMAT_VERSION {
            return Err(ArchiveError::corrupt(offset, format!("unsupported format version {version}")));
        }
        let flags = read_u16(reader)?;
        let creation_timestamp = read_i64(reader)?;
        Ok(Self { version, flags, creation_timestamp })
    }
}
