//! # filesync
//!
//! Copies files, directories and symlinks from a source tree into an existing
//! destination tree when they are missing there or differ in size.
//!
//! ## Usage
//! ```bash
//! # Mirror ~/docs into /backup/docs, deleting files gone from the source
//! filesync -s ~/docs -d /backup/docs -l
//!
//! # Only text files, matched by regex on the whole name
//! filesync -s src -d dst -r full -p '.*\.txt'
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, ValueEnum};
use filesync_io_fs::{
    EnumSyncOutcome, EnumSyncPatternMode, EnumSyncVerbosity, SpecSyncOptions, SyncTreeError,
    sync_tree,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// One-way incremental directory synchronization
#[derive(Parser, Debug)]
#[command(name = "filesync")]
#[command(version)]
#[command(disable_version_flag = true)]
#[command(about = "Copy what is missing or changed from one directory tree into another")]
#[command(
    after_help = "The -p option restricts files and symlinks copied to those that match the \
given pattern(s); use it once per pattern. Patterns use '*' and '?' unless -r is given."
)]
struct Cli {
    /// Source directory
    #[arg(short = 's', value_name = "SOURCE_DIR")]
    source: PathBuf,

    /// Destination directory (must already exist)
    #[arg(short = 'd', value_name = "DEST_DIR")]
    destination: PathBuf,

    /// Name pattern to match; wildcard by default, regex with -r
    #[arg(short = 'p', value_name = "PATTERN")]
    patterns: Vec<String>,

    /// Regex matching: partial (some of the name) or full (whole name)
    #[arg(short = 'r', value_enum, value_name = "MODE")]
    regex: Option<RegexMode>,

    /// Verbosity level
    #[arg(
        short = 'b',
        value_name = "LEVEL",
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(0..=2)
    )]
    verbosity: u8,

    /// Compare file contents, not just size (may be very slow for large files)
    #[arg(short = 'c')]
    compare_contents: bool,

    /// Do NOT stop on errors
    #[arg(short = 'e')]
    no_stop_on_error: bool,

    /// Ignore case in names when not using regex
    #[arg(short = 'i')]
    ignore_case: bool,

    /// Delete files (not directories) in the destination that don't exist in the source
    #[arg(short = 'l')]
    delete_unmatched: bool,

    /// Do NOT copy mode, owner, group, access and modification times
    #[arg(short = 'm')]
    no_metadata: bool,

    /// Copy (and delete with -l) dot files and directories, e.g. .profile
    #[arg(short = 'o')]
    dot_entries: bool,

    /// Copy extended attributes if possible; failure is only a warning
    #[arg(short = 'x')]
    xattrs: bool,

    /// Print version and exit
    #[arg(short = 'v', action = ArgAction::Version)]
    version: Option<bool>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RegexMode {
    /// Some of the name must match
    Partial,
    /// The whole name must match
    Full,
}

impl From<RegexMode> for EnumSyncPatternMode {
    fn from(mode: RegexMode) -> Self {
        match mode {
            RegexMode::Partial => EnumSyncPatternMode::RegexPartial,
            RegexMode::Full => EnumSyncPatternMode::RegexFull,
        }
    }
}

impl Cli {
    fn to_options(&self) -> SpecSyncOptions {
        SpecSyncOptions {
            if_stop_on_error: !self.no_stop_on_error,
            if_delete_unmatched: self.delete_unmatched,
            if_include_dot_entries: self.dot_entries,
            if_copy_metadata: !self.no_metadata,
            if_copy_xattrs: self.xattrs,
            if_compare_contents: self.compare_contents,
            if_ignore_case: self.ignore_case,
            patterns: self.patterns.clone(),
            rule_pattern: self
                .regex
                .map_or(EnumSyncPatternMode::Wildcard, EnumSyncPatternMode::from),
            verbosity: EnumSyncVerbosity::from_level(self.verbosity)
                .unwrap_or(EnumSyncVerbosity::Normal),
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(cli.verbosity);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// `RUST_LOG` wins; otherwise the level follows `-b`.
fn init_logging(n_verbosity: u8) {
    let c_level = match n_verbosity {
        0 => "error",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(c_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<ExitCode> {
    validate(cli)?;

    let spec_sync_options = cli.to_options();
    let verbosity = spec_sync_options.verbosity;
    debug!(?spec_sync_options, "Parsed options");
    if verbosity >= EnumSyncVerbosity::Normal {
        print_banner();
    }

    let report = match sync_tree(&cli.source, &cli.destination, spec_sync_options) {
        Ok(report) => report,
        Err(SyncTreeError::Aborted {
            path,
            message,
            report,
        }) => {
            eprintln!("ERROR: {message}");
            eprintln!("Stopped at \"{}\"; use -e to continue past errors.", path.display());
            if verbosity >= EnumSyncVerbosity::Normal {
                print!("\n{}", report.format_summary());
            }
            return Ok(ExitCode::from(2));
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!(
                    "Failed to sync \"{}\" into \"{}\"",
                    cli.source.display(),
                    cli.destination.display()
                )
            });
        }
    };

    match report.outcome {
        EnumSyncOutcome::NothingToUpdate => println!("Nothing to update."),
        EnumSyncOutcome::Updated => {
            if verbosity >= EnumSyncVerbosity::Normal {
                println!("\n{}", report.format_summary());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn validate(cli: &Cli) -> Result<()> {
    if cli.ignore_case && cli.regex.is_some() {
        bail!("The -i and -r options are mutually exclusive.");
    }
    if is_same_or_nested(&cli.source, &cli.destination) {
        bail!(
            "The destination directory is the same or a sub directory of the source directory."
        );
    }
    Ok(())
}

/// True when `path_dst` is `path_src` or lies beneath it.
///
/// Compared after resolving both paths; falls back to a lexical check when
/// either cannot be resolved.
fn is_same_or_nested(path_src: &Path, path_dst: &Path) -> bool {
    match (fs::canonicalize(path_src), fs::canonicalize(path_dst)) {
        (Ok(path_src_real), Ok(path_dst_real)) => path_dst_real.starts_with(path_src_real),
        _ => path_dst.starts_with(path_src),
    }
}

fn print_banner() {
    println!("\n*** FILESYNC ***\n");
    println!("Version   : {}\n", env!("CARGO_PKG_VERSION"));
}
