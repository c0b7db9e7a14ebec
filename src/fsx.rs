//! Cross-platform filesystem wrapper.
//!
//! On Unix we transparently re-export std::fs and map POSIX permission bits
//! straight onto files and directories. On other platforms the permission
//! helpers are no-ops so archives built on Unix can still be restored there;
//! modification times work everywhere.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use std::fs::*;

#[cfg(unix)]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
/// No-op off Unix: POSIX permission bits are not preserved.
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
/// Permission bits of an entry, without the file type bits.
pub fn unix_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub fn unix_mode(meta: &Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Modification time as Unix seconds; pre-epoch or unavailable times map to 0.
pub fn mtime_secs(meta: &Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Set the modification time of an existing file.
pub fn set_mtime(path: &Path, secs: i64) -> io::Result<()> {
    let when = if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    };
    set_file_mtime(path, when)
}

fn set_file_mtime(path: &Path, when: SystemTime) -> io::Result<()> {
    let f = OpenOptions::new().write(true).open(path)?;
    f.set_modified(when)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mtime_round_trips() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("index.php");
        write(&p, b"<?php").unwrap();
        set_mtime(&p, 1_500_000_000).unwrap();
        assert_eq!(mtime_secs(&metadata(&p).unwrap()), 1_500_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn permissions_are_applied() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("wp-config.php");
        write(&p, b"x").unwrap();
        set_unix_permissions(&p, 0o600).unwrap();
        assert_eq!(unix_mode(&metadata(&p).unwrap()), 0o600);
    }
}
