//! Destination mapping for extraction.
//!
//! A `PathMapper` is handed to `ExpandState` when it is built and decides where each archived
//! relative path lands: an explicit rename wins, otherwise the path is joined onto the base.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::is_safe_relative;
use crate::error::{ArchiveError, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMapper {
    base_path: PathBuf,
    /// Archived relative path → destination. Relative targets are taken from `base_path`.
    file_renames: BTreeMap<String, PathBuf>,
}

impl PathMapper {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into(), file_renames: BTreeMap::new() }
    }

    pub fn with_rename(mut self, relative_path: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        self.add_rename(relative_path, target);
        self
    }

    pub fn add_rename(&mut self, relative_path: impl Into<String>, target: impl Into<PathBuf>) {
        self.file_renames.insert(relative_path.into(), target.into());
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn renames(&self) -> &BTreeMap<String, PathBuf> {
        &self.file_renames
    }

    /// Destination of an archived entry.
    pub fn resolve(&self, relative_path: &str) -> Result<PathBuf> {
        if let Some(target) = self.file_renames.get(relative_path) {
            return Ok(if target.is_absolute() { target.clone() } else { self.base_path.join(target) });
        }
        if !is_safe_relative(relative_path) {
            return Err(ArchiveError::InvalidPath(relative_path.to_string()));
        }
        let mut out = self.base_path.clone();
        out.extend(relative_path.split('/'));
        Ok(out)
    }
}
