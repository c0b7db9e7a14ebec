use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `sitepack` crate.
///
/// Only archive-medium failures are fatal for a running build or extract.
/// Everything that concerns a single entry is folded into the state's
/// failure list by the processor instead of being returned.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// An I/O error on a source or destination file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: std::io::Error, path: PathBuf },

    /// The archive itself could not be written. Aborts a build.
    #[error("archive write failed at offset {offset}: {source}")]
    ArchiveWrite { offset: u64, source: std::io::Error },

    /// The archive itself could not be read. Aborts an extract.
    #[error("archive read failed at offset {offset}: {source}")]
    ArchiveRead { offset: u64, source: std::io::Error },

    /// A header or payload in the archive is structurally invalid.
    #[error("corrupt archive at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// Stored and recomputed hashes disagree.
    #[error("hash mismatch for {subject}: expected {expected}, got {actual}")]
    HashMismatch { subject: String, expected: String, actual: String },

    /// A persisted state or scan list could not be (de)serialized.
    #[error("state serialization error: {0}")]
    State(#[from] serde_json::Error),

    /// A glob codec failed to transform a payload.
    #[error("codec error: {0}")]
    Codec(String),

    /// A glob refers to a codec id this build does not know.
    #[error("unknown glob codec id {0}")]
    UnknownCodec(u8),

    /// A relative path in the archive escapes the destination root or is not valid UTF-8.
    #[error("invalid entry path '{0}'")]
    InvalidPath(String),
}

impl ArchiveError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ArchiveError::Io { source, path: path.into() }
    }

    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        ArchiveError::Corrupt { offset, reason: reason.into() }
    }

    /// True when the archive medium itself failed and no further entry could succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArchiveError::ArchiveWrite { .. } | ArchiveError::ArchiveRead { .. } | ArchiveError::State(_))
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Io { source: err, path: PathBuf::new() }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
