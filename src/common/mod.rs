//! Source tree enumeration.
//!
//! The builder consumes entries strictly by index, so the list is produced once, saved next to
//! the build state, and reused by every later invocation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ArchiveError, Result};
use crate::fsx;
use crate::state::{load_json, save_json};

/// Metadata for a single file or directory entry to be archived.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Root-relative, `/`-separated.
    pub relative_path: String,
    pub source_path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub mtime: i64, // Unix timestamp
    pub permissions: u32,
}

/// Ordered entries of one source tree.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScanList {
    pub root: PathBuf,
    pub entries: Vec<ScanEntry>,
}

impl ScanList {
    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_dir).count()
    }

    pub fn directory_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_dir).count()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

/// Normalize path by replacing backslashes with forward slashes and dropping a leading `./`.
/// Example: "./dir1\\dir2/file.txt" becomes "dir1/dir2/file.txt"
pub(crate) fn normalize_path(path: &str) -> String {
    let s = path.replace('\\', "/");
    let trimmed = s.strip_prefix("./").unwrap_or(&s);
    let mut res = trimmed.to_string();
    while res.contains("//") {
        res = res.replace("//", "/");
    }
    res
}

/// Enumerates `root` depth-first, sorted by name, directories before their contents.
///
/// Entries the walker cannot read are logged and left out; files that become unreadable
/// later are the builder's concern. Symlinks are not followed and not archived.
pub fn scan_tree(root: &Path) -> Result<ScanList> {
    let meta = fsx::metadata(root).map_err(|e| ArchiveError::io(e, root))?;
    let mut entries = Vec::new();

    if meta.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ArchiveError::InvalidPath(root.display().to_string()))?;
        entries.push(entry_for(root, name, &meta));
        return Ok(ScanList { root: root.to_path_buf(), entries });
    }

    for item in WalkDir::new(root).min_depth(1).follow_links(false).sort_by_file_name() {
        let e = match item {
            Ok(e) => e,
            Err(err) => {
                warn!("skipping unreadable path during scan: {}", err);
                continue;
            }
        };
        if e.file_type().is_symlink() {
            debug!(path = %e.path().display(), "skipping symlink");
            continue;
        }
        let rel = match e.path().strip_prefix(root) {
            Ok(r) => normalize_path(&r.to_string_lossy()),
            Err(_) => continue,
        };
        let meta = match e.metadata() {
            Ok(m) => m,
            Err(err) => {
                warn!(path = %e.path().display(), "skipping entry without metadata: {}", err);
                continue;
            }
        };
        entries.push(entry_for(e.path(), rel, &meta));
    }

    debug!(root = %root.display(), entries = entries.len(), "scan complete");
    Ok(ScanList { root: root.to_path_buf(), entries })
}

fn entry_for(path: &Path, relative_path: String, meta: &fsx::Metadata) -> ScanEntry {
    ScanEntry {
        relative_path,
        source_path: path.to_path_buf(),
        is_dir: meta.is_dir(),
        size: if meta.is_dir() { 0 } else { meta.len() },
        mtime: fsx::mtime_secs(meta),
        permissions: fsx::unix_mode(meta),
    }
}
