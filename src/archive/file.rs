use std::io::{Read, Seek, Write};

use serde::{Deserialize, Serialize};

use super::{check_path_len, read_array, read_i64, read_path, read_u32, read_u64, stream_offset, write_record, GlobHeader};
use crate::error::{ArchiveError, Result};

/// The whole-file hash field holds a valid blake3 digest.
pub const FILE_FLAG_HASHED: u32 = 0x1;

/// One file entry. The file's content follows as globs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Root-relative, `/`-separated path.
    pub relative_path: String,
    pub file_size: u64,
    pub mtime: i64,
    pub permissions: u32,
    pub flags: u32,
    /// blake3 of the whole file; all zero unless `FILE_FLAG_HASHED` is set.
    pub hash: [u8; 32],
}

impl FileHeader {
    pub const SIGNATURE: &'static [u8; 4] = b"SPFH";
    /// Size of everything but the path bytes.
    pub const FIXED_SIZE: usize = 4 + 8 + 8 + 4 + 4 + 32 + 4;

    pub fn new(relative_path: impl Into<String>, file_size: u64, mtime: i64, permissions: u32, hash: Option<[u8; 32]>) -> Self {
        let (flags, hash) = match hash {
            Some(h) => (FILE_FLAG_HASHED, h),
            None => (0, [0u8; 32]),
        };
        Self { relative_path: relative_path.into(), file_size, mtime, permissions, flags, hash }
    }

    pub fn has_hash(&self) -> bool {
        self.flags & FILE_FLAG_HASHED != 0
    }

    pub fn hash_hex(&self) -> String {
        blake3::Hash::from(self.hash).to_hex().to_string()
    }

    /// Size of this header on the wire.
    pub fn encoded_len(&self) -> usize {
        Self::FIXED_SIZE + self.relative_path.len()
    }

    pub fn write_to_archive<W: Write + Seek>(&self, writer: &mut W) -> Result<usize> {
        let path_len = check_path_len(&self.relative_path)?;
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(Self::SIGNATURE);
        buf.extend_from_slice(&self.file_size.to_le_bytes());
        buf.extend_from_slice(&self.mtime.to_le_bytes());
        buf.extend_from_slice(&self.permissions.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.hash);
        buf.extend_from_slice(&path_len.to_le_bytes());
        buf.extend_from_slice(self.relative_path.as_bytes());
        write_record(writer, &buf)
    }

    /// Reads the header. With `skip_payload` the reader is also moved past every glob of the
    /// file, leaving it at the next entry.
    pub fn read_from_archive<R: Read + Seek>(reader: &mut R, skip_payload: bool) -> Result<Self> {
        let offset = stream_offset(reader);
        let sig: [u8; 4] = read_array(reader)?;
        if &sig != Self::SIGNATURE {
            return Err(ArchiveError::corrupt(offset, "expected file header"));
        }
        let file_size = read_u64(reader)?;
        let mtime = read_i64(reader)?;
        let permissions = read_u32(reader)?;
        let flags = read_u32(reader)?;
        let hash: [u8; 32] = read_array(reader)?;
        let len = read_u32(reader)?;
        let relative_path = read_path(reader, len)?;
        let header = Self { relative_path, file_size, mtime, permissions, flags, hash };

        if skip_payload {
            let mut remaining = header.file_size;
            while remaining > 0 {
                let glob = GlobHeader::read_from_archive(reader, true)?;
                if glob.original_size == 0 {
                    return Err(ArchiveError::corrupt(stream_offset(reader), "empty glob"));
                }
                remaining = remaining.checked_sub(glob.original_size as u64).ok_or_else(|| {
                    ArchiveError::corrupt(stream_offset(reader), format!("globs of '{}' exceed its size", header.relative_path))
                })?;
            }
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::IdentityCodec;
    use std::io::Cursor;

    #[test]
    fn file_header_round_trip() {
        let h = FileHeader::new("index.php", 42, 1_600_000_000, 0o644, Some(*blake3::hash(b"x").as_bytes()));
        let mut c = Cursor::new(Vec::new());
        assert_eq!(h.write_to_archive(&mut c).unwrap(), h.encoded_len());
        c.set_position(0);
        let back = FileHeader::read_from_archive(&mut c, false).unwrap();
        assert_eq!(back, h);
        assert!(back.has_hash());
        assert_eq!(back.hash_hex(), blake3::hash(b"x").to_hex().to_string());
    }

    #[test]
    fn skip_payload_lands_on_next_entry() {
        let data = b"hello world, this spans two globs";
        let h = FileHeader::new("a.txt", data.len() as u64, 0, 0o644, None);
        let mut c = Cursor::new(Vec::new());
        h.write_to_archive(&mut c).unwrap();
        for chunk in data.chunks(20) {
            let mut g = GlobHeader::default();
            g.set_hash(chunk);
            let stored = g.content_to_write(chunk, &IdentityCodec).unwrap();
            g.write_to_archive(&mut c).unwrap();
            c.write_all(&stored).unwrap();
        }
        let end = c.position();
        c.write_all(b"SPDH").unwrap();
        c.set_position(0);
        FileHeader::read_from_archive(&mut c, true).unwrap();
        assert_eq!(c.position(), end);
    }

    #[test]
    fn oversized_glob_chain_is_corrupt() {
        let h = FileHeader::new("a.txt", 3, 0, 0o644, None);
        let mut c = Cursor::new(Vec::new());
        h.write_to_archive(&mut c).unwrap();
        let mut g = GlobHeader::default();
        g.set_hash(b"12345");
        let stored = g.content_to_write(b"12345", &IdentityCodec).unwrap();
        g.write_to_archive(&mut c).unwrap();
        c.write_all(&stored).unwrap();
        c.set_position(0);
        assert!(matches!(FileHeader::read_from_archive(&mut c, true), Err(ArchiveError::Corrupt { .. })));
    }
}
