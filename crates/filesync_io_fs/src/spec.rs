//! Sync specification models and top-level error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::report::ReportSync;

////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// Name filter interpretation for `patterns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumSyncPatternMode {
    /// Patterns are ignored; every name matches.
    None,
    /// Shell-like wildcards; only `*` and `?` are special.
    #[default]
    Wildcard,
    /// Regular expression; any match inside the name is enough.
    RegexPartial,
    /// Regular expression; the match must cover the whole name.
    RegexFull,
}

impl EnumSyncPatternMode {
    pub fn is_regex(self) -> bool {
        matches!(self, Self::RegexPartial | Self::RegexFull)
    }
}

/// How much progress detail is emitted while syncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum EnumSyncVerbosity {
    /// Errors only.
    None,
    /// Copies, creations, deletions and warnings.
    #[default]
    Normal,
    /// Everything, including skipped entries.
    High,
}

impl EnumSyncVerbosity {
    /// Map a numeric level (`0..=2`) to a verbosity.
    pub fn from_level(n_level: u8) -> Option<Self> {
        match n_level {
            0 => Some(Self::None),
            1 => Some(Self::Normal),
            2 => Some(Self::High),
            _ => None,
        }
    }
}

/// Kind of a filesystem object as observed without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumSyncEntryKind {
    File,
    Directory,
    Symlink,
    /// Device, fifo, socket.
    Other,
}

/// Final state of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumSyncOutcome {
    /// Nothing was copied and nothing was deleted.
    #[default]
    NothingToUpdate,
    /// At least one object was copied or deleted.
    Updated,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StructsAndErrors

/// Input options for `sync_tree`.
#[derive(Debug, Clone)]
pub struct SpecSyncOptions {
    /// Abort the whole run on the first recoverable error.
    pub if_stop_on_error: bool,
    /// Delete destination regular files that have no source counterpart.
    pub if_delete_unmatched: bool,
    /// Include names starting with `.`.
    pub if_include_dot_entries: bool,
    /// Copy owner, group, mode and timestamps.
    pub if_copy_metadata: bool,
    /// Copy extended attributes (only after metadata copy succeeded).
    pub if_copy_xattrs: bool,
    /// Compare contents of same-sized files; also allows replacing stale symlinks.
    pub if_compare_contents: bool,
    /// Match source and destination names case-insensitively.
    pub if_ignore_case: bool,
    /// Name patterns restricting which files and symlinks are copied.
    pub patterns: Vec<String>,
    /// Pattern interpretation mode.
    pub rule_pattern: EnumSyncPatternMode,
    /// Progress detail.
    pub verbosity: EnumSyncVerbosity,
}

impl Default for SpecSyncOptions {
    fn default() -> Self {
        Self {
            if_stop_on_error: true,
            if_delete_unmatched: false,
            if_include_dot_entries: false,
            if_copy_metadata: true,
            if_copy_xattrs: false,
            if_compare_contents: false,
            if_ignore_case: false,
            patterns: Vec::new(),
            rule_pattern: EnumSyncPatternMode::Wildcard,
            verbosity: EnumSyncVerbosity::Normal,
        }
    }
}

/// One sync failure item with path + error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSyncError {
    /// Failed source or destination path.
    pub path: PathBuf,
    /// User-facing error text.
    pub exception: String,
}

/// Errors that end a `sync_tree` call without a completed report.
#[derive(Debug, Error)]
pub enum SyncTreeError {
    /// Invalid name pattern.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    /// Option combination that cannot be honoured.
    #[error("Conflicting options: {0}")]
    ConflictingOptions(String),
    /// Destination root is missing or cannot be inspected.
    #[error("Destination root unavailable {}: {source}", .path.display())]
    DestinationRootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A recoverable error occurred while `if_stop_on_error` was set.
    #[error("Sync stopped at {}: {message}", .path.display())]
    Aborted {
        path: PathBuf,
        message: String,
        /// Counters accumulated before the stop.
        report: Box<ReportSync>,
    },
}

/// Internal stop signal raised by a recoverable error under `if_stop_on_error`.
///
/// Converted into [`SyncTreeError::Aborted`] once the partial report is built.
#[derive(Debug)]
pub(crate) struct SignalAbort {
    pub(crate) path: PathBuf,
    pub(crate) message: String,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
