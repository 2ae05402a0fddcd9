//! `filesync_io_fs` v1:
//! One-way incremental directory-tree synchronization.
//!
//! Module layout:
//! - `sync`     : tree walker, run context and `sync_tree` entry point
//! - `snapshot` : per-directory listings with lstat records
//! - `file`     : regular-file reconciliation and byte copy
//! - `symlink`  : symlink reconciliation
//! - `meta`     : ownership/mode/times and extended attributes
//! - `spec`     : enums/options/errors
//! - `report`   : run-time report model
//! - `util`     : name filters and size formatting

pub mod file;
pub mod meta;
pub mod report;
pub mod snapshot;
pub mod spec;
mod symlink;
pub mod sync;
mod util;

pub use file::{copy_bytes, identical_contents};
pub use meta::{copy_file_attrs, copy_xattrs};
pub use report::{ReportSync, ReportSyncBuilder};
pub use snapshot::{SpecDirSnapshot, SpecFileRecord};
pub use spec::{
    EnumSyncEntryKind, EnumSyncOutcome, EnumSyncPatternMode, EnumSyncVerbosity, SpecSyncError,
    SpecSyncOptions, SyncTreeError,
};
pub use sync::sync_tree;
pub use util::format_size;
