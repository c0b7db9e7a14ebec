//! End-of-run summary for builds and extracts.

use std::fmt;

use crate::error::ArchiveError;
use crate::create::Manifest;
use crate::failure::{Failure, FailureLog};
use crate::state::{CreateState, ExpandState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Every entry was visited but some were recorded as failed.
    CompletedWithWarnings,
    /// A fatal error stopped the run.
    Aborted(String),
}

#[derive(Debug, Clone)]
pub struct Report {
    pub outcome: Outcome,
    pub failures: Vec<Failure>,
    pub file_write_count: u64,
    pub directory_write_count: u64,
    pub skipped_file_count: u64,
    /// Build summary carried by the archive, for extracts of archives that have one.
    pub manifest: Option<Manifest>,
}

impl Report {
    pub fn from_create(state: &CreateState) -> Self {
        Self {
            outcome: outcome_for(state.failures.is_empty()),
            failures: state.failures.iter().cloned().collect(),
            file_write_count: state.archived_file_count,
            directory_write_count: state.archived_directory_count,
            skipped_file_count: state.skipped_file_count,
            manifest: None,
        }
    }

    pub fn from_expand(state: &ExpandState) -> Self {
        Self {
            outcome: outcome_for(state.failures.is_empty()),
            failures: state.failures.iter().cloned().collect(),
            file_write_count: state.file_write_count,
            directory_write_count: state.directory_write_count,
            skipped_file_count: 0,
            manifest: state.manifest.clone(),
        }
    }

    /// Report for a run that stopped on `err`. Failures collected so far are kept and the
    /// fatal cause is appended.
    pub fn aborted(err: &ArchiveError, failures: &FailureLog) -> Self {
        let mut failures = failures.clone();
        failures.add_abort(err);
        Self {
            outcome: Outcome::Aborted(err.to_string()),
            failures: failures.iter().cloned().collect(),
            file_write_count: 0,
            directory_write_count: 0,
            skipped_file_count: 0,
            manifest: None,
        }
    }

    pub fn has_fatal(&self) -> bool {
        self.failures.iter().any(|f| f.fatal)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

fn outcome_for(clean: bool) -> Outcome {
    if clean {
        Outcome::Success
    } else {
        Outcome::CompletedWithWarnings
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::CompletedWithWarnings => write!(f, "completed with warnings"),
            Outcome::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Result: {}", self.outcome)?;
        write!(
            f,
            "  files: {}, directories: {}",
            self.file_write_count, self.directory_write_count
        )?;
        if self.skipped_file_count > 0 {
            write!(f, ", skipped: {}", self.skipped_file_count)?;
        }
        writeln!(f)?;
        if let Some(m) = &self.manifest {
            writeln!(
                f,
                "  archive: {} files, {} directories, built {}{}",
                m.file_count,
                m.directory_count,
                m.created_at.to_rfc3339(),
                if m.finished { "" } else { " (unfinished)" }
            )?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "  failures ({}):", self.failures.len())?;
            for failure in &self.failures {
                writeln!(f, "    {failure}")?;
            }
        }
        Ok(())
    }
}
