use sitepack::common::scan_tree;
use sitepack::create::run_build_slice;
use sitepack::extract::run_expand_slice;
use sitepack::fsx;
use sitepack::mapping::PathMapper;
use sitepack::state::{CreateOptions, CreateState, ExpandOptions, ExpandState, SliceOutcome};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const ARCHIVED_MTIME: i64 = 1_500_000_000;

fn build_site(work: &Path) -> PathBuf {
    let src = work.join("src");
    fs::create_dir_all(src.join("uploads")).unwrap();
    fs::write(src.join("wp-config.php"), b"<?php define('DB_NAME', 'site');").unwrap();
    fs::write(src.join("uploads/logo.svg"), b"<svg/>").unwrap();
    fs::write(src.join("empty.log"), b"").unwrap();
    for f in ["wp-config.php", "uploads/logo.svg", "empty.log"] {
        fsx::set_mtime(&src.join(f), ARCHIVED_MTIME).unwrap();
    }
    let archive = work.join("site.spk");
    let scan = scan_tree(&src).unwrap();
    let mut state = CreateState::new(CreateOptions { write_manifest: false, ..Default::default() });
    while run_build_slice(&mut state, &archive, &scan).unwrap() == SliceOutcome::InProgress {}
    archive
}

fn expand(archive: &Path, mapper: PathMapper, options: ExpandOptions) -> ExpandState {
    let mut state = ExpandState::new(mapper, options);
    while run_expand_slice(&mut state, archive).unwrap() == SliceOutcome::InProgress {}
    state
}

#[test]
fn renames_are_honored() {
    let work = tempdir().unwrap();
    let archive = build_site(work.path());
    let dest = work.path().join("out");
    let elsewhere = work.path().join("private/wp-config.php");
    let mapper = PathMapper::new(&dest)
        .with_rename("wp-config.php", &elsewhere)
        .with_rename("uploads/logo.svg", "static/logo.svg");

    let state = expand(&archive, mapper, ExpandOptions::default());
    assert!(state.failures.is_empty());
    assert_eq!(fs::read(&elsewhere).unwrap(), b"<?php define('DB_NAME', 'site');");
    assert_eq!(fs::read(dest.join("static/logo.svg")).unwrap(), b"<svg/>");
    assert!(!dest.join("wp-config.php").exists());
    assert!(!dest.join("uploads/logo.svg").exists());
    // the directory entry itself is not renamed
    assert!(dest.join("uploads").is_dir());
}

#[test]
fn renames_hold_with_mode_override_and_kept_times() {
    let work = tempdir().unwrap();
    let archive = build_site(work.path());
    let dest = work.path().join("out");
    let elsewhere = work.path().join("private/wp-config.php");
    let mapper = PathMapper::new(&dest)
        .with_rename("wp-config.php", &elsewhere)
        .with_rename("uploads/logo.svg", "static/logo.svg");

    let state = expand(
        &archive,
        mapper,
        ExpandOptions { directory_mode_override: Some(0o750), keep_file_time: true, ..Default::default() },
    );
    assert!(state.failures.is_empty());
    for target in [elsewhere.clone(), dest.join("static/logo.svg")] {
        let meta = fs::metadata(&target).unwrap();
        assert_eq!(fsx::mtime_secs(&meta), ARCHIVED_MTIME, "{}", target.display());
    }
    assert_eq!(fs::read(&elsewhere).unwrap(), b"<?php define('DB_NAME', 'site');");
    assert!(!dest.join("wp-config.php").exists());
    assert!(!dest.join("uploads/logo.svg").exists());
    #[cfg(unix)]
    {
        assert_eq!(fsx::unix_mode(&fs::metadata(dest.join("uploads")).unwrap()), 0o750);
        // parents created for a rename target get the override too
        assert_eq!(fsx::unix_mode(&fs::metadata(dest.join("static")).unwrap()), 0o750);
    }
}

#[test]
fn keep_file_time_restores_archived_mtime() {
    let work = tempdir().unwrap();
    let archive = build_site(work.path());

    let kept = work.path().join("kept");
    expand(&archive, PathMapper::new(&kept), ExpandOptions { keep_file_time: true, ..Default::default() });
    let meta = fs::metadata(kept.join("uploads/logo.svg")).unwrap();
    assert_eq!(fsx::mtime_secs(&meta), ARCHIVED_MTIME);

    let fresh = work.path().join("fresh");
    expand(&archive, PathMapper::new(&fresh), ExpandOptions::default());
    let meta = fs::metadata(fresh.join("uploads/logo.svg")).unwrap();
    assert!(fsx::mtime_secs(&meta) > ARCHIVED_MTIME);
}

#[cfg(unix)]
#[test]
fn mode_overrides_apply_to_files_and_directories() {
    let work = tempdir().unwrap();
    let archive = build_site(work.path());
    let dest = work.path().join("out");
    let state = expand(
        &archive,
        PathMapper::new(&dest),
        ExpandOptions { directory_mode_override: Some(0o750), file_mode_override: Some(0o600), ..Default::default() },
    );
    assert!(state.failures.is_empty());
    assert_eq!(fsx::unix_mode(&fs::metadata(dest.join("uploads")).unwrap()), 0o750);
    assert_eq!(fsx::unix_mode(&fs::metadata(dest.join("wp-config.php")).unwrap()), 0o600);
    assert_eq!(fsx::unix_mode(&fs::metadata(dest.join("uploads/logo.svg")).unwrap()), 0o600);
    assert_eq!(fsx::unix_mode(&fs::metadata(dest.join("empty.log")).unwrap()), 0o600);
}

#[test]
fn zero_length_file_replaces_stale_file_with_fresh_mtime() {
    let work = tempdir().unwrap();
    let archive = build_site(work.path());
    let dest = work.path().join("out");
    fs::create_dir_all(&dest).unwrap();
    let stale = dest.join("empty.log");
    fs::write(&stale, b"yesterday's log lines").unwrap();
    fsx::set_mtime(&stale, 1_000_000_000).unwrap();

    expand(&archive, PathMapper::new(&dest), ExpandOptions::default());
    let meta = fs::metadata(&stale).unwrap();
    assert_eq!(meta.len(), 0);
    assert!(fsx::mtime_secs(&meta) > ARCHIVED_MTIME);
}
