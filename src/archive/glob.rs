use std::io::{Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};

use super::{read_array, read_exact_mapped, read_u32, stream_offset, write_record, MAX_GLOB_SIZE};
use crate::compress::{codec_for_id, GlobCodec, IDENTITY_CODEC_ID};
use crate::error::{ArchiveError, Result};

/// Header of one chunk of file payload.
///
/// `original_size` counts bytes of the source file, `stored_size` the bytes that follow this
/// header in the archive. They differ when the codec transforms the payload or when the
/// payload was zero-padded to a reserved size.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobHeader {
    pub codec: u8,
    pub original_size: u32,
    pub stored_size: u32,
    /// crc32 over the original bytes.
    pub hash: u32,
}

impl Default for GlobHeader {
    fn default() -> Self {
        Self { codec: IDENTITY_CODEC_ID, original_size: 0, stored_size: 0, hash: 0 }
    }
}

pub(crate) fn crc32(content: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(content);
    hasher.finalize()
}

impl GlobHeader {
    pub const SIGNATURE: &'static [u8; 4] = b"SPGH";
    pub const SIZE: usize = 4 + 1 + 3 + 4 + 4 + 4;

    /// Records the size and checksum of the original bytes.
    pub fn set_hash(&mut self, content: &[u8]) {
        self.original_size = content.len() as u32;
        self.hash = crc32(content);
    }

    /// True when `content` is what this glob was hashed from.
    pub fn matches(&self, content: &[u8]) -> bool {
        content.len() == self.original_size as usize && crc32(content) == self.hash
    }

    /// Transforms `content` into its stored form and records the codec and stored size.
    ///
    /// Payloads the codec cannot shrink are stored as-is, so a glob never grows past its input.
    pub fn content_to_write(&mut self, content: &[u8], codec: &dyn GlobCodec) -> Result<Vec<u8>> {
        if content.len() > MAX_GLOB_SIZE as usize {
            return Err(ArchiveError::Codec(format!("glob of {} bytes is too large", content.len())));
        }
        let mut stored = codec.encode(content)?;
        self.codec = codec.id();
        if self.codec != IDENTITY_CODEC_ID && stored.len() >= content.len() {
            stored = content.to_vec();
            self.codec = IDENTITY_CODEC_ID;
        }
        self.stored_size = stored.len() as u32;
        Ok(stored)
    }

    /// Identity-stores `content` and zero-pads it to exactly `reserved` bytes.
    pub fn padded_content_to_write(&mut self, content: &[u8], reserved: u32) -> Result<Vec<u8>> {
        if content.len() > reserved as usize {
            return Err(ArchiveError::Codec(format!(
                "{} bytes do not fit the {} bytes reserved",
                content.len(),
                reserved
            )));
        }
        let mut stored = content.to_vec();
        stored.resize(reserved as usize, 0);
        self.codec = IDENTITY_CODEC_ID;
        self.stored_size = reserved;
        Ok(stored)
    }

    pub fn write_to_archive<W: Write + Seek>(&self, writer: &mut W) -> Result<usize> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(Self::SIGNATURE);
        buf.push(self.codec);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&self.original_size.to_le_bytes());
        buf.extend_from_slice(&self.stored_size.to_le_bytes());
        buf.extend_from_slice(&self.hash.to_le_bytes());
        write_record(writer, &buf)
    }

    /// Reads the header. With `skip_content` the stored payload is seeked over as well.
    pub fn read_from_archive<R: Read + Seek>(reader: &mut R, skip_content: bool) -> Result<Self> {
        let offset = stream_offset(reader);
        let sig: [u8; 4] = read_array(reader)?;
        if &sig != Self::SIGNATURE {
            return Err(ArchiveError::corrupt(offset, "expected glob header"));
        }
        let [codec, _, _, _]: [u8; 4] = read_array(reader)?;
        let original_size = read_u32(reader)?;
        let stored_size = read_u32(reader)?;
        let hash = read_u32(reader)?;
        if original_size > MAX_GLOB_SIZE || stored_size > MAX_GLOB_SIZE {
            return Err(ArchiveError::corrupt(
                offset,
                format!("implausible glob sizes {original_size}/{stored_size}"),
            ));
        }
        let glob = Self { codec, original_size, stored_size, hash };
        if skip_content {
            let here = stream_offset(reader);
            reader
                .seek(SeekFrom::Current(stored_size as i64))
                .map_err(|e| ArchiveError::ArchiveRead { offset: here, source: e })?;
        }
        Ok(glob)
    }

    /// Reads `stored_size` bytes and reverses the codec transform.
    ///
    /// The stored bytes are always consumed in full before decoding, so the reader stays
    /// positioned at the next record even when decoding or verification fails.
    pub fn read_content<R: Read + Seek>(&self, reader: &mut R, verify: bool) -> Result<Vec<u8>> {
        let offset = stream_offset(reader);
        let mut stored = vec![0u8; self.stored_size as usize];
        read_exact_mapped(reader, &mut stored, offset)?;
        let codec = codec_for_id(self.codec)?;
        let content = codec.decode(&stored, self.original_size as usize)?;
        if content.len() != self.original_size as usize {
            return Err(ArchiveError::Codec(format!(
                "glob at offset {offset} decoded to {} bytes, expected {}",
                content.len(),
                self.original_size
            )));
        }
        if verify {
            let actual = crc32(&content);
            if actual != self.hash {
                return Err(ArchiveError::HashMismatch {
                    subject: format!("glob at offset {offset}"),
                    expected: format!("{:08x}", self.hash),
                    actual: format!("{:08x}", actual),
                });
            }
        }
        Ok(content)
    }
}
