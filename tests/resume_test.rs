use rand::{thread_rng, Rng};
use sitepack::archive::ArchiveHeader;
use sitepack::common::{scan_tree, ScanList};
use sitepack::create::run_build_slice;
use sitepack::extract::run_expand_slice;
use sitepack::mapping::PathMapper;
use sitepack::state::{CreateOptions, CreateState, ExpandOptions, ExpandState, SliceOutcome, TimeBudget};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const GLOB: u32 = 1024;

// ---------- helpers ----------
fn site() -> TempDir {
    let src = tempdir().unwrap();
    let mut rng = thread_rng();
    fs::create_dir_all(src.path().join("wp-content/uploads")).unwrap();
    for (name, len) in [
        ("empty.txt", 0usize),
        ("index.php", 300),
        ("wp-content/exact.bin", GLOB as usize),
        ("wp-content/uploads/big.bin", GLOB as usize * 5 + 123),
        ("zz-last.css", 2_500),
    ] {
        let mut buf = vec![0u8; len];
        rng.fill(&mut buf[..]);
        fs::write(src.path().join(name), buf).unwrap();
    }
    src
}

fn options(budget: TimeBudget) -> CreateOptions {
    CreateOptions { glob_size: GLOB, budget, write_manifest: false, ..Default::default() }
}

/// Builds in as many invocations as `budget` requires, round-tripping the state through disk
/// between them. Returns the number of invocations.
fn build_in_slices(scan: &ScanList, archive: &Path, state_path: &Path, budget: TimeBudget, garbage: bool) -> usize {
    let mut state = CreateState::new(options(budget));
    let mut slices = 0;
    loop {
        slices += 1;
        let outcome = run_build_slice(&mut state, archive, scan).unwrap();
        if outcome == SliceOutcome::Complete {
            return slices;
        }
        state.save(state_path).unwrap();
        if garbage {
            // bytes written after the last checkpoint by an invocation that was killed
            let mut f = OpenOptions::new().append(true).open(archive).unwrap();
            f.write_all(b"torn write").unwrap();
        }
        state = CreateState::load(state_path).unwrap();
    }
}

fn payload(archive: &Path) -> Vec<u8> {
    fs::read(archive).unwrap()[ArchiveHeader::SIZE..].to_vec()
}

fn tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().into_owned();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[test]
fn sliced_build_matches_uninterrupted_build() {
    let src = site();
    let scan = scan_tree(src.path()).unwrap();
    let work = tempdir().unwrap();

    let whole = work.path().join("whole.spk");
    assert_eq!(build_in_slices(&scan, &whole, &work.path().join("whole.json"), TimeBudget::Unlimited, false), 1);
    let expected = payload(&whole);

    for k in [1u64, 2, 3, 7] {
        let sliced = work.path().join(format!("sliced-{k}.spk"));
        let slices = build_in_slices(&scan, &sliced, &work.path().join(format!("sliced-{k}.json")), TimeBudget::Units(k), false);
        assert!(slices > 1, "budget of {k} units should need several invocations");
        assert_eq!(payload(&sliced), expected, "archive built with {k}-unit slices differs");
    }
}

#[test]
fn resumed_build_discards_bytes_past_the_checkpoint() {
    let src = site();
    let scan = scan_tree(src.path()).unwrap();
    let work = tempdir().unwrap();

    let whole = work.path().join("whole.spk");
    build_in_slices(&scan, &whole, &work.path().join("whole.json"), TimeBudget::Unlimited, false);
    let torn = work.path().join("torn.spk");
    build_in_slices(&scan, &torn, &work.path().join("torn.json"), TimeBudget::Units(2), true);
    assert_eq!(payload(&torn), payload(&whole));
}

#[test]
fn sliced_extract_matches_source() {
    let src = site();
    let scan = scan_tree(src.path()).unwrap();
    let work = tempdir().unwrap();
    let archive = work.path().join("site.spk");
    build_in_slices(&scan, &archive, &work.path().join("build.json"), TimeBudget::Unlimited, false);

    for k in [1u64, 3] {
        let dest = work.path().join(format!("out-{k}"));
        let state_path = work.path().join(format!("extract-{k}.json"));
        let mut state = ExpandState::new(
            PathMapper::new(&dest),
            ExpandOptions { budget: TimeBudget::Units(k), ..Default::default() },
        );
        let mut slices = 0;
        while run_expand_slice(&mut state, &archive).unwrap() == SliceOutcome::InProgress {
            slices += 1;
            state.save(&state_path).unwrap();
            state = ExpandState::load(&state_path).unwrap();
        }
        assert!(slices > 1);
        assert!(state.failures.is_empty());
        assert_eq!(state.file_write_count, 5);
        assert_eq!(tree(&dest), tree(src.path()));
    }
}

#[test]
fn resumed_extract_truncates_a_partially_written_file() {
    let src = site();
    let scan = scan_tree(src.path()).unwrap();
    let work = tempdir().unwrap();
    let archive = work.path().join("site.spk");
    build_in_slices(&scan, &archive, &work.path().join("build.json"), TimeBudget::Unlimited, false);

    let dest = work.path().join("out");
    let state_path = work.path().join("extract.json");
    let mut state = ExpandState::new(
        PathMapper::new(&dest),
        ExpandOptions { budget: TimeBudget::Units(2), ..Default::default() },
    );
    let mut tampered = false;
    while run_expand_slice(&mut state, &archive).unwrap() == SliceOutcome::InProgress {
        if let Some(h) = state.current_file_header.clone() {
            if state.current_file_offset > 0 && !tampered {
                let partial = dest.join(&h.relative_path);
                let mut f = OpenOptions::new().append(true).open(&partial).unwrap();
                f.write_all(b"written after the checkpoint").unwrap();
                tampered = true;
            }
        }
        state.save(&state_path).unwrap();
        state = ExpandState::load(&state_path).unwrap();
    }
    assert!(tampered);
    assert_eq!(tree(&dest), tree(src.path()));
}
