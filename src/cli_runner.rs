//! Command dispatch for the `sitepack` binary.
//!
//! Each `create`/`extract` invocation runs one slice: it loads the saved state if there is
//! one, advances it, and either saves it again or, once the archive is complete, prints the
//! report and removes the sidecar files.

use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::cli::{self, Commands};
use crate::common::{scan_tree, ScanList};
use crate::create::run_build_slice;
use crate::extract::{list_entries, run_expand_slice, ListedEntry};
use crate::mapping::PathMapper;
use crate::report::Report;
use crate::state::{CreateOptions, CreateState, ExpandOptions, ExpandState, SliceOutcome, TimeBudget, ValidationMode};

/// `<path>.<suffix>`, next to `path`.
pub fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<(), Box<dyn Error>> {
    let command = cli::run()?;

    match command {
        Commands::Create {
            source,
            output,
            glob_size,
            throttle_us,
            time_budget_ms,
            unit_budget,
            codec,
            no_hash,
            no_manifest,
            state,
        } => {
            let budget = cli::get_time_budget_from_opt_or_env(time_budget_ms, unit_budget)?;
            let throttle = cli::get_throttle_from_opt_or_env(throttle_us)?;
            let options = CreateOptions {
                glob_size,
                throttle_delay_us: throttle,
                budget,
                codec: codec.into(),
                hash_files: !no_hash,
                write_manifest: !no_manifest,
            };
            let state_path = state.unwrap_or_else(|| sidecar_path(&output, "state.json"));
            run_create(&source, &output, &state_path, options)?;
        }
        Commands::Extract {
            archive,
            output,
            rename,
            dir_mode,
            file_mode,
            keep_file_time,
            validate,
            time_budget_ms,
            unit_budget,
            state,
        } => {
            let budget = cli::get_time_budget_from_opt_or_env(time_budget_ms, unit_budget)?;
            let mut mapper = PathMapper::new(output.unwrap_or_else(|| PathBuf::from(".")));
            for (from, to) in rename {
                mapper.add_rename(from, to);
            }
            let options = ExpandOptions {
                directory_mode_override: dir_mode,
                file_mode_override: file_mode,
                keep_file_time,
                validate_only: false,
                validation_mode: validate.into(),
                budget,
            };
            let state_path = state.unwrap_or_else(|| sidecar_path(&archive, "extract.json"));
            run_extract(&archive, &state_path, mapper, options)?;
        }
        Commands::Validate { archive, full } => {
            let report = validate_archive(&archive, full)?;
            print!("{report}");
            if !report.is_success() {
                return Err(format!("{} failed validation with {} problem(s)", archive.display(), report.failures.len()).into());
            }
        }
        Commands::List { archive } => {
            let (header, entries) = list_entries(&archive)?;
            println!(
                "Archive v{} created {} ({} entries):",
                header.version,
                chrono::DateTime::from_timestamp(header.creation_timestamp, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| header.creation_timestamp.to_string()),
                entries.len()
            );
            for entry in &entries {
                match entry {
                    ListedEntry::Directory(d) => println!("d {:04o} {}/", d.permissions, d.relative_path),
                    ListedEntry::File(f) => println!("- {:04o} {} ({} bytes)", f.permissions, f.relative_path, f.file_size),
                }
            }
        }
    }

    Ok(())
}

/// Runs one build slice, creating the state and scan list on the first call.
pub fn run_create(source: &Path, output: &Path, state_path: &Path, options: CreateOptions) -> Result<SliceOutcome, Box<dyn Error>> {
    let scan_path = sidecar_path(output, "scan.json");
    let (mut state, scan) = if state_path.exists() {
        let mut state = CreateState::load(state_path)?;
        let scan = ScanList::load(&scan_path)?;
        info!(state = %state_path.display(), index = state.current_file_index, "resuming build");
        // The budget and throttle belong to this invocation; everything else is fixed at start.
        state.budget = options.budget;
        state.throttle_delay_us = options.throttle_delay_us;
        (state, scan)
    } else {
        let scan = scan_tree(source)?;
        scan.save(&scan_path)?;
        debug!(scan = %scan_path.display(), entries = scan.entries.len(), "scan list saved");
        (CreateState::new(options), scan)
    };

    match run_build_slice(&mut state, output, &scan) {
        Ok(SliceOutcome::InProgress) => {
            state.save(state_path)?;
            println!(
                "In progress: {}/{} entries, {} bytes written. Run again to continue.",
                state.current_file_index,
                scan.entries.len(),
                state.archive_offset
            );
            Ok(SliceOutcome::InProgress)
        }
        Ok(SliceOutcome::Complete) => {
            print!("{}", Report::from_create(&state));
            remove_if_present(state_path)?;
            remove_if_present(&scan_path)?;
            Ok(SliceOutcome::Complete)
        }
        Err(e) => {
            // The saved checkpoint is left alone; the next run restarts from it.
            print!("{}", Report::aborted(&e, &state.failures));
            Err(e.into())
        }
    }
}

/// Runs one extract slice, creating the state on the first call.
pub fn run_extract(archive: &Path, state_path: &Path, mapper: PathMapper, options: ExpandOptions) -> Result<SliceOutcome, Box<dyn Error>> {
    let mut state = if state_path.exists() {
        let mut state = ExpandState::load(state_path)?;
        info!(state = %state_path.display(), offset = state.archive_offset, "resuming extract");
        state.options.budget = options.budget;
        state
    } else {
        ExpandState::new(mapper, options)
    };

    match run_expand_slice(&mut state, archive) {
        Ok(SliceOutcome::InProgress) => {
            state.save(state_path)?;
            let current = state.current_file_header.as_ref().map(|h| h.relative_path.as_str()).unwrap_or("-");
            println!(
                "In progress: {} files, {} directories done, at '{}'. Run again to continue.",
                state.file_write_count, state.directory_write_count, current
            );
            Ok(SliceOutcome::InProgress)
        }
        Ok(SliceOutcome::Complete) => {
            print!("{}", Report::from_expand(&state));
            remove_if_present(state_path)?;
            Ok(SliceOutcome::Complete)
        }
        Err(e) => {
            print!("{}", Report::aborted(&e, &state.failures));
            Err(e.into())
        }
    }
}

/// Checks a whole archive in one go.
///
/// `full` rebuilds each file in the extractor's scratch directory to compare whole-file
/// hashes. Nothing is left behind.
pub fn validate_archive(archive: &Path, full: bool) -> Result<Report, Box<dyn Error>> {
    let options = ExpandOptions {
        validate_only: true,
        validation_mode: if full { ValidationMode::Full } else { ValidationMode::Standard },
        budget: TimeBudget::Unlimited,
        ..Default::default()
    };
    let mut state = ExpandState::new(PathMapper::default(), options);
    match run_expand_slice(&mut state, archive) {
        Ok(_) => Ok(Report::from_expand(&state)),
        Err(e) => Ok(Report::aborted(&e, &state.failures)),
    }
}
