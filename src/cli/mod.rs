use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::compress::CodecKind;
use crate::state::{TimeBudget, ValidationMode};

/// Environment fallback for `--time-budget-ms`.
pub const TIME_BUDGET_ENV: &str = "SITEPACK_TIME_BUDGET_MS";
/// Environment fallback for `--throttle-us`.
pub const THROTTLE_ENV: &str = "SITEPACK_THROTTLE_US";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create (or continue creating) an archive of a site directory.
    #[command(alias = "c")]
    Create {
        /// The directory (or single file) to archive.
        #[arg(required = true)]
        source: PathBuf,

        /// The path for the output archive file (e.g., site.spk).
        #[arg(short, long)]
        output: PathBuf,

        /// Maximum bytes of a file stored per glob (at most 64 MiB).
        #[arg(
            long,
            default_value_t = crate::state::DEFAULT_GLOB_SIZE,
            value_parser = clap::value_parser!(u32).range(1..=crate::archive::MAX_GLOB_SIZE as i64)
        )]
        glob_size: u32,

        /// Sleep this many microseconds before each glob. Falls back to SITEPACK_THROTTLE_US.
        #[arg(long)]
        throttle_us: Option<u64>,

        /// Stop after this many milliseconds and save progress. Falls back to SITEPACK_TIME_BUDGET_MS.
        #[arg(long)]
        time_budget_ms: Option<u64>,

        /// `[ADVANCED]` Stop after this many globs instead of a wall-clock budget.
        #[arg(long, hide = true)]
        unit_budget: Option<u64>,

        /// Payload codec for new globs.
        #[arg(long, value_enum, default_value_t = CodecArg::Identity)]
        codec: CodecArg,

        /// Do not store a whole-file hash in each file header.
        #[arg(long)]
        no_hash: bool,

        /// Do not write the `.sitepack/manifest.json` entry.
        #[arg(long)]
        no_manifest: bool,

        /// Where progress is kept between runs. Defaults to `<output>.state.json`.
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Extract (or continue extracting) an archive.
    #[command(alias = "x")]
    Extract {
        /// The archive file to extract.
        #[arg(required = true)]
        archive: PathBuf,

        /// The directory where files will be extracted. Defaults to the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Place an archived path somewhere else, as ARCHIVED=TARGET. May be repeated.
        #[arg(long, value_parser = parse_rename)]
        rename: Vec<(String, PathBuf)>,

        /// Octal mode applied to every created directory (e.g. 755).
        #[arg(long, value_parser = parse_octal_mode)]
        dir_mode: Option<u32>,

        /// Octal mode applied to every written file (e.g. 644).
        #[arg(long, value_parser = parse_octal_mode)]
        file_mode: Option<u32>,

        /// Restore archived modification times on files.
        #[arg(long)]
        keep_file_time: bool,

        /// How much checking to do while extracting.
        #[arg(long, value_enum, default_value_t = ValidateArg::Standard)]
        validate: ValidateArg,

        /// Stop after this many milliseconds and save progress. Falls back to SITEPACK_TIME_BUDGET_MS.
        #[arg(long)]
        time_budget_ms: Option<u64>,

        /// `[ADVANCED]` Stop after this many globs instead of a wall-clock budget.
        #[arg(long, hide = true)]
        unit_budget: Option<u64>,

        /// Where progress is kept between runs. Defaults to `<archive>.extract.json`.
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Check an archive without writing anything.
    #[command(alias = "v")]
    Validate {
        /// The archive file to check.
        #[arg(required = true)]
        archive: PathBuf,

        /// Also rebuild every file in a scratch directory and compare whole-file hashes.
        #[arg(long)]
        full: bool,
    },

    /// List the contents of an archive without extracting it.
    #[command(alias = "l")]
    List {
        /// The archive file to list contents of.
        #[arg(required = true)]
        archive: PathBuf,
    },
}

/// Payload codec selectable on the command line.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodecArg {
    /// Store globs as-is.
    Identity,
    /// Compress each glob with Zstandard.
    Zstd,
}

impl From<CodecArg> for CodecKind {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Identity => CodecKind::Identity,
            CodecArg::Zstd => CodecKind::Zstd,
        }
    }
}

/// Checking level selectable on the command line.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValidateArg {
    /// Structural parsing only.
    None,
    /// Verify each glob's checksum.
    Standard,
    /// Glob checksums plus whole-file hashes.
    Full,
}

impl From<ValidateArg> for ValidationMode {
    fn from(arg: ValidateArg) -> Self {
        match arg {
            ValidateArg::None => ValidationMode::None,
            ValidateArg::Standard => ValidationMode::Standard,
            ValidateArg::Full => ValidationMode::Full,
        }
    }
}

/// Parses `755`, `0755` or `0o755`.
pub fn parse_octal_mode(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0o").unwrap_or(s);
    let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("'{s}' is not an octal mode: {e}"))?;
    if mode > 0o7777 {
        return Err(format!("mode {s} is out of range"));
    }
    Ok(mode)
}

/// Parses `ARCHIVED=TARGET`.
pub fn parse_rename(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() => Ok((from.to_string(), PathBuf::from(to))),
        _ => Err(format!("'{s}' is not of the form ARCHIVED=TARGET")),
    }
}

/// Gets the per-invocation budget from the command-line options or the `SITEPACK_TIME_BUDGET_MS`
/// environment variable.
///
/// Priority:
/// 1. `--unit-budget`.
/// 2. `--time-budget-ms`.
/// 3. `SITEPACK_TIME_BUDGET_MS`.
/// 4. Unlimited.
pub fn get_time_budget_from_opt_or_env(millis_opt: Option<u64>, units_opt: Option<u64>) -> Result<TimeBudget, String> {
    if let Some(units) = units_opt {
        return Ok(TimeBudget::Units(units));
    }
    if let Some(ms) = millis_opt {
        return Ok(TimeBudget::Millis(ms));
    }
    match std::env::var(TIME_BUDGET_ENV) {
        Ok(v) => v
            .trim()
            .parse()
            .map(TimeBudget::Millis)
            .map_err(|e| format!("{TIME_BUDGET_ENV}='{v}': {e}")),
        Err(_) => Ok(TimeBudget::Unlimited),
    }
}

/// Gets the throttle delay from `--throttle-us` or the `SITEPACK_THROTTLE_US` environment variable.
pub fn get_throttle_from_opt_or_env(throttle_opt: Option<u64>) -> Result<u64, String> {
    if let Some(us) = throttle_opt {
        return Ok(us);
    }
    match std::env::var(THROTTLE_ENV) {
        Ok(v) => v.trim().parse().map_err(|e| format!("{THROTTLE_ENV}='{v}': {e}")),
        Err(_) => Ok(0),
    }
}

/// Parses command-line arguments using `clap` and returns the command to execute.
pub fn run() -> Result<Commands, Box<dyn std::error::Error>> {
    let args = Args::parse();
    Ok(args.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octal_modes() {
        assert_eq!(parse_octal_mode("755").unwrap(), 0o755);
        assert_eq!(parse_octal_mode("0644").unwrap(), 0o644);
        assert_eq!(parse_octal_mode("0o600").unwrap(), 0o600);
        assert!(parse_octal_mode("999").is_err());
        assert!(parse_octal_mode("17777").is_err());
    }

    #[test]
    fn renames() {
        assert_eq!(
            parse_rename("wp-config.php=/etc/site/wp-config.php").unwrap(),
            ("wp-config.php".to_string(), PathBuf::from("/etc/site/wp-config.php"))
        );
        assert!(parse_rename("no-target=").is_err());
        assert!(parse_rename("plain").is_err());
    }

    #[test]
    fn explicit_budget_options_win() {
        assert_eq!(get_time_budget_from_opt_or_env(Some(500), Some(4)).unwrap(), TimeBudget::Units(4));
        assert_eq!(get_time_budget_from_opt_or_env(Some(500), None).unwrap(), TimeBudget::Millis(500));
        assert_eq!(get_throttle_from_opt_or_env(Some(25)).unwrap(), 25);
    }

    #[test]
    fn extract_args_parse() {
        let args = Args::try_parse_from([
            "sitepack",
            "extract",
            "site.spk",
            "-o",
            "/srv/site",
            "--rename",
            "a.txt=b.txt",
            "--file-mode",
            "640",
            "--validate",
            "full",
        ])
        .unwrap();
        match args.command {
            Commands::Extract { rename, file_mode, validate, .. } => {
                assert_eq!(rename, vec![("a.txt".to_string(), PathBuf::from("b.txt"))]);
                assert_eq!(file_mode, Some(0o640));
                assert_eq!(validate, ValidateArg::Full);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn glob_size_outside_the_format_limit_is_rejected() {
        for bad in ["0", "67108865"] {
            let parsed = Args::try_parse_from(["sitepack", "create", "site", "-o", "site.spk", "--glob-size", bad]);
            assert!(parsed.is_err(), "--glob-size {bad} accepted");
        }
        let args =
            Args::try_parse_from(["sitepack", "create", "site", "-o", "site.spk", "--glob-size", "67108864"]).unwrap();
        match args.command {
            Commands::Create { glob_size, .. } => assert_eq!(glob_size, crate::archive::MAX_GLOB_SIZE),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
