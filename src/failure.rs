//! Per-entry failures collected while a build or extract keeps going.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ArchiveError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    File,
    Directory,
}

/// Why an entry failed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// Build: the source file could not be opened or read. The file is skipped.
    SourceUnreadable,
    /// Build: the archive could not be written. Aborts.
    ArchiveWriteFailure,
    /// Extract: the destination file could not be created or written.
    DestinationUnwritable,
    /// Extract: a directory could not be created.
    DirectoryCreateFailure,
    /// Extract/validate: a record in the archive is malformed.
    ArchiveCorrupt,
    /// Extract/validate: stored and recomputed hashes disagree.
    HashMismatch,
    /// Extract: the archive could not be read. Aborts.
    ArchiveReadFailure,
}

impl FailureCause {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureCause::ArchiveWriteFailure | FailureCause::ArchiveReadFailure)
    }

    /// The fatal cause behind an error that stopped a run, if it was an archive I/O error.
    pub fn for_error(err: &ArchiveError) -> Option<Self> {
        match err {
            ArchiveError::ArchiveWrite { .. } => Some(FailureCause::ArchiveWriteFailure),
            ArchiveError::ArchiveRead { .. } => Some(FailureCause::ArchiveReadFailure),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub cause: FailureCause,
    /// Relative path of the entry.
    pub subject: String,
    pub description: String,
    pub fatal: bool,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::File => "file",
            FailureKind::Directory => "directory",
        };
        write!(f, "[{:?}] {} '{}': {}", self.cause, kind, self.subject, self.description)?;
        if self.fatal {
            write!(f, " (fatal)")?;
        }
        Ok(())
    }
}

/// Ordered list of failures, persisted with the state it belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureLog {
    entries: Vec<Failure>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: FailureKind, cause: FailureCause, subject: impl Into<String>, description: impl Into<String>) {
        let failure = Failure {
            kind,
            cause,
            subject: subject.into(),
            description: description.into(),
            fatal: cause.is_fatal(),
        };
        warn!(subject = %failure.subject, cause = ?failure.cause, "{}", failure.description);
        self.entries.push(failure);
    }

    pub fn add_file(&mut self, cause: FailureCause, subject: impl Into<String>, description: impl Into<String>) {
        self.add(FailureKind::File, cause, subject, description)
    }

    pub fn add_directory(&mut self, cause: FailureCause, subject: impl Into<String>, description: impl Into<String>) {
        self.add(FailureKind::Directory, cause, subject, description)
    }

    /// True when `subject` already has a failure recorded, whatever its cause.
    pub fn has_failure_for(&self, subject: &str) -> bool {
        self.entries.iter().any(|f| f.subject == subject)
    }

    pub fn count_of(&self, cause: FailureCause) -> usize {
        self.entries.iter().filter(|f| f.cause == cause).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Failure> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_fatal(&self) -> bool {
        self.entries.iter().any(|f| f.fatal)
    }

    /// Records the archive error that aborted the run. Other errors leave the log as it is.
    pub fn add_abort(&mut self, err: &ArchiveError) {
        if let Some(cause) = FailureCause::for_error(err) {
            self.add_file(cause, "<archive>", err.to_string());
        }
    }
}
