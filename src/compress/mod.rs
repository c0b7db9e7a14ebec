//! # Glob Codecs
//!
//! A codec turns the original bytes of a glob into the bytes that are stored in the archive,
//! and back. The chunking and resume logic never looks inside a payload, so compression or
//! encryption can be layered in here without touching it.
//!
//! Each glob records the id of the codec that produced it, which keeps archives built with a
//! mix of codecs readable.

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

pub const IDENTITY_CODEC_ID: u8 = 0;
pub const ZSTD_CODEC_ID: u8 = 1;

/// A reversible transform applied to each glob payload.
pub trait GlobCodec {
    /// Id written into every glob header produced by this codec.
    fn id(&self) -> u8;

    fn encode(&self, content: &[u8]) -> Result<Vec<u8>>;

    /// `original_size` is the length recorded in the glob header. Stored data may be longer
    /// than the encoded form (zero padding), decoders must ignore the excess.
    fn decode(&self, stored: &[u8], original_size: usize) -> Result<Vec<u8>>;
}

/// Stores payloads unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl GlobCodec for IdentityCodec {
    fn id(&self) -> u8 {
        IDENTITY_CODEC_ID
    }

    fn encode(&self, content: &[u8]) -> Result<Vec<u8>> {
        Ok(content.to_vec())
    }

    fn decode(&self, stored: &[u8], original_size: usize) -> Result<Vec<u8>> {
        if stored.len() < original_size {
            return Err(ArchiveError::Codec(format!(
                "stored payload of {} bytes is shorter than {original_size}",
                stored.len()
            )));
        }
        Ok(stored[..original_size].to_vec())
    }
}

/// Compresses each glob as an independent zstd frame.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl GlobCodec for ZstdCodec {
    fn id(&self) -> u8 {
        ZSTD_CODEC_ID
    }

    fn encode(&self, content: &[u8]) -> Result<Vec<u8>> {
        zstd::bulk::compress(content, self.level).map_err(|e| ArchiveError::Codec(format!("zstd compress: {e}")))
    }

    fn decode(&self, stored: &[u8], original_size: usize) -> Result<Vec<u8>> {
        zstd::bulk::decompress(stored, original_size).map_err(|e| ArchiveError::Codec(format!("zstd decompress: {e}")))
    }
}

/// Codec selection persisted with a build.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    #[default]
    Identity,
    Zstd,
}

impl CodecKind {
    pub fn id(&self) -> u8 {
        match self {
            CodecKind::Identity => IDENTITY_CODEC_ID,
            CodecKind::Zstd => ZSTD_CODEC_ID,
        }
    }

    pub fn codec(&self) -> Box<dyn GlobCodec> {
        match self {
            CodecKind::Identity => Box::new(IdentityCodec),
            CodecKind::Zstd => Box::new(ZstdCodec::default()),
        }
    }
}

/// Looks up the decoder for a glob's codec id.
pub fn codec_for_id(id: u8) -> Result<Box<dyn GlobCodec>> {
    match id {
        IDENTITY_CODEC_ID => Ok(Box::new(IdentityCodec)),
        ZSTD_CODEC_ID => Ok(Box::new(ZstdCodec::default())),
        other => Err(ArchiveError::UnknownCodec(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_padding() {
        let c = IdentityCodec;
        let mut stored = c.encode(b"abc").unwrap();
        stored.extend_from_slice(&[0, 0, 0]);
        assert_eq!(c.decode(&stored, 3).unwrap(), b"abc");
        assert!(c.decode(b"ab", 3).is_err());
    }

    #[test]
    fn zstd_round_trip() {
        let c = ZstdCodec::default();
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 7) as u8).collect();
        let stored = c.encode(&data).unwrap();
        assert!(stored.len() < data.len());
        assert_eq!(c.decode(&stored, data.len()).unwrap(), data);
    }

    #[test]
    fn ids_resolve() {
        for kind in [CodecKind::Identity, CodecKind::Zstd] {
            assert_eq!(codec_for_id(kind.id()).unwrap().id(), kind.id());
            assert_eq!(kind.codec().id(), kind.id());
        }
        assert!(matches!(codec_for_id(9), Err(ArchiveError::UnknownCodec(9))));
    }
}
