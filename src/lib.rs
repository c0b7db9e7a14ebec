//! # sitepack Core Library
//!
//! This crate packs a whole website tree into a single archive and restores it again, in
//! short invocations that each stop after a bounded amount of work and resume exactly where
//! the previous one left off.
//!
//! It is designed to be used by the `sitepack` command-line application, but its public API
//! can also be driven directly: build a [`state::CreateState`] or [`state::ExpandState`],
//! call [`create::run_build_slice`] or [`extract::run_expand_slice`] until it reports
//! [`state::SliceOutcome::Complete`], and persist the state between calls.
//!
//! ## Key Modules
//!
//! - [`archive`]: The on-disk record types and their binary encoding.
//! - [`compress`]: Per-glob payload codecs (identity and `zstd`).
//! - [`create`]: The resumable archive builder.
//! - [`extract`]: The resumable extractor, validator and lister.
//! - [`state`]: Persisted build/extract cursors and the time budget.
//!
//! ## Examples
//!
//! ```no_run
//! use sitepack::common::scan_tree;
//! use sitepack::create::run_build_slice;
//! use sitepack::state::{CreateOptions, CreateState, SliceOutcome};
//! use std::path::Path;
//!
//! let scan = scan_tree(Path::new("/srv/site"))?;
//! let mut state = CreateState::new(CreateOptions::default());
//! while run_build_slice(&mut state, Path::new("site.spk"), &scan)? == SliceOutcome::InProgress {}
//! # Ok::<(), sitepack::ArchiveError>(())
//! ```

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod compress;
pub mod create;
pub mod error;
pub mod extract;
pub mod failure;
// Cross-platform filesystem wrapper
pub mod fsx;
pub mod mapping;
pub mod report;
pub mod state;

pub use error::{ArchiveError, Result};
