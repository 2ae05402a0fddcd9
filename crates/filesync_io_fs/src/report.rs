//! Sync report models and mutable report builder.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::spec::{EnumSyncOutcome, SpecSyncError};
use crate::util::format_size;

/// Aggregate counters and diagnostics for one `sync_tree` run.
#[derive(Debug, Default, Clone)]
pub struct ReportSync {
    /// Regular files copied.
    pub cnt_files_copied: u64,
    /// Symlinks created or recreated.
    pub cnt_symlinks_copied: u64,
    /// Directories created.
    pub cnt_dirs_copied: u64,
    /// Files, symlinks and directories together.
    pub cnt_total_copied: u64,
    /// Bytes written into copied files.
    pub n_bytes_copied: u64,
    /// Extended attribute key/value pairs copied.
    pub cnt_xattr_copied: u64,
    /// Objects that received at least one extended attribute.
    pub cnt_xattr_objects: u64,
    /// Destination files deleted because the source no longer has them.
    pub cnt_unmatched_deleted: u64,
    /// Whether anything changed in the destination.
    pub outcome: EnumSyncOutcome,
    /// Non-fatal warnings collected during traversal/copy.
    pub warnings: Vec<String>,
    /// Per-entry failures.
    pub errors: Vec<SpecSyncError>,
}

impl ReportSync {
    /// Number of collected hard errors.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Number of collected warnings.
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_files_copied".to_string(), self.cnt_files_copied);
        dict_counts.insert("cnt_symlinks_copied".to_string(), self.cnt_symlinks_copied);
        dict_counts.insert("cnt_dirs_copied".to_string(), self.cnt_dirs_copied);
        dict_counts.insert("cnt_total_copied".to_string(), self.cnt_total_copied);
        dict_counts.insert("n_bytes_copied".to_string(), self.n_bytes_copied);
        dict_counts.insert("cnt_xattr_copied".to_string(), self.cnt_xattr_copied);
        dict_counts.insert("cnt_xattr_objects".to_string(), self.cnt_xattr_objects);
        dict_counts.insert(
            "cnt_unmatched_deleted".to_string(),
            self.cnt_unmatched_deleted,
        );
        dict_counts.insert("cnt_errors".to_string(), self.error_count() as u64);
        dict_counts.insert("cnt_warnings".to_string(), self.warning_count() as u64);
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        format!(
            "{prefix} files={} symlinks={} dirs={} bytes={} deleted={} errors={} warnings={}",
            self.cnt_files_copied,
            self.cnt_symlinks_copied,
            self.cnt_dirs_copied,
            self.n_bytes_copied,
            self.cnt_unmatched_deleted,
            self.error_count(),
            self.warning_count()
        )
    }

    /// Multi-line end-of-run summary table.
    pub fn format_summary(&self) -> String {
        let mut c_summary = String::new();
        c_summary.push_str(&format!(
            "Files copied        : {} ({})\n",
            self.cnt_files_copied,
            format_size(self.n_bytes_copied)
        ));
        c_summary.push_str(&format!(
            "Symlinks copied     : {}\n",
            self.cnt_symlinks_copied
        ));
        c_summary.push_str(&format!("Directories copied  : {}\n", self.cnt_dirs_copied));
        c_summary.push_str(&format!("Total FS objs copied: {}\n", self.cnt_total_copied));
        c_summary.push_str(&format!(
            "Xattributes copied  : {} from {} filesystem objects\n",
            self.cnt_xattr_copied, self.cnt_xattr_objects
        ));
        c_summary.push_str(&format!(
            "Unmatched deleted   : {}\n",
            self.cnt_unmatched_deleted
        ));
        c_summary.push_str(&format!("Warnings            : {}\n", self.warning_count()));
        c_summary.push_str(&format!("Errors              : {}\n", self.error_count()));
        c_summary
    }
}

impl fmt::Display for ReportSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[SYNC]"))
    }
}

/// Mutable accumulator for sync statistics.
#[derive(Debug, Default, Clone)]
pub struct ReportSyncBuilder {
    /// See [`ReportSync::cnt_files_copied`].
    pub cnt_files_copied: u64,
    /// See [`ReportSync::cnt_symlinks_copied`].
    pub cnt_symlinks_copied: u64,
    /// See [`ReportSync::cnt_dirs_copied`].
    pub cnt_dirs_copied: u64,
    /// See [`ReportSync::n_bytes_copied`].
    pub n_bytes_copied: u64,
    /// See [`ReportSync::cnt_xattr_copied`].
    pub cnt_xattr_copied: u64,
    /// See [`ReportSync::cnt_xattr_objects`].
    pub cnt_xattr_objects: u64,
    /// See [`ReportSync::cnt_unmatched_deleted`].
    pub cnt_unmatched_deleted: u64,
    /// See [`ReportSync::errors`].
    pub errors: Vec<SpecSyncError>,
    /// See [`ReportSync::warnings`].
    pub warnings: Vec<String>,
}

impl ReportSyncBuilder {
    /// Record one copied regular file of `n_bytes` bytes.
    pub fn add_file_copied(&mut self, n_bytes: u64) {
        self.cnt_files_copied += 1;
        self.n_bytes_copied += n_bytes;
    }

    /// Record one created symlink.
    pub fn add_symlink_copied(&mut self) {
        self.cnt_symlinks_copied += 1;
    }

    /// Record one created directory.
    pub fn add_dir_copied(&mut self) {
        self.cnt_dirs_copied += 1;
    }

    /// Record extended attributes copied onto one object.
    pub fn add_xattrs_copied(&mut self, cnt_keys: u64) {
        if cnt_keys == 0 {
            return;
        }
        self.cnt_xattr_copied += cnt_keys;
        self.cnt_xattr_objects += 1;
    }

    /// Record one deleted unmatched file.
    pub fn add_unmatched_deleted(&mut self) {
        self.cnt_unmatched_deleted += 1;
    }

    /// Add warning message.
    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Add one path-scoped error.
    pub fn add_error(&mut self, path: PathBuf, exception: String) {
        self.errors.push(SpecSyncError { path, exception });
    }

    /// Files, symlinks and directories copied so far.
    pub fn total_copied(&self) -> u64 {
        self.cnt_files_copied + self.cnt_symlinks_copied + self.cnt_dirs_copied
    }

    /// True when the destination has been modified in any way.
    pub fn has_changes(&self) -> bool {
        self.total_copied() > 0 || self.cnt_unmatched_deleted > 0
    }

    /// Finalize builder into immutable report.
    pub fn build(self, outcome: EnumSyncOutcome) -> ReportSync {
        ReportSync {
            cnt_total_copied: self.total_copied(),
            cnt_files_copied: self.cnt_files_copied,
            cnt_symlinks_copied: self.cnt_symlinks_copied,
            cnt_dirs_copied: self.cnt_dirs_copied,
            n_bytes_copied: self.n_bytes_copied,
            cnt_xattr_copied: self.cnt_xattr_copied,
            cnt_xattr_objects: self.cnt_xattr_objects,
            cnt_unmatched_deleted: self.cnt_unmatched_deleted,
            outcome,
            warnings: self.warnings,
            errors: self.errors,
        }
    }
}
