//! Recursive tree reconciliation.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::file::reconcile_file;
use crate::meta::apply_metadata;
use crate::report::{ReportSync, ReportSyncBuilder};
use crate::snapshot::{SpecDirSnapshot, SpecFileRecord, list_directory};
use crate::spec::{
    EnumSyncEntryKind, EnumSyncOutcome, EnumSyncVerbosity, SignalAbort, SpecSyncOptions,
    SyncTreeError,
};
use crate::symlink::reconcile_symlink;
use crate::util::SpecNameFilter;

/// Mode for destination directories created by the walker.
const N_MODE_DIR_CREATE: u32 = 0o755;

/// Run-scoped state shared by every reconciler.
#[derive(Debug)]
pub(crate) struct SpecSyncContext {
    pub(crate) spec_sync_options: SpecSyncOptions,
    pub(crate) spec_name_filter: SpecNameFilter,
    pub(crate) builder_sync_report: ReportSyncBuilder,
    /// `(device, inode)` of the destination root.
    pub(crate) id_dir_dst_root: Option<(u64, u64)>,
}

impl SpecSyncContext {
    pub(crate) fn new(spec_sync_options: SpecSyncOptions) -> Result<Self, SyncTreeError> {
        if spec_sync_options.if_ignore_case && spec_sync_options.rule_pattern.is_regex() {
            return Err(SyncTreeError::ConflictingOptions(
                "case-insensitive names cannot be combined with regex matching".to_string(),
            ));
        }
        let spec_name_filter = SpecNameFilter::from_raw(
            &spec_sync_options.patterns,
            spec_sync_options.rule_pattern,
        )?;
        Ok(Self {
            spec_sync_options,
            spec_name_filter,
            builder_sync_report: ReportSyncBuilder::default(),
            id_dir_dst_root: None,
        })
    }

    pub(crate) fn is_verbose(&self) -> bool {
        self.spec_sync_options.verbosity >= EnumSyncVerbosity::Normal
    }

    pub(crate) fn is_verbose_high(&self) -> bool {
        self.spec_sync_options.verbosity >= EnumSyncVerbosity::High
    }

    /// Record a recoverable error; stops the run when `if_stop_on_error` is set.
    pub(crate) fn record_error(&mut self, path: &Path, message: String) -> Result<(), SignalAbort> {
        error!(path = %path.display(), "{message}");
        self.builder_sync_report
            .add_error(path.to_path_buf(), message.clone());
        if self.spec_sync_options.if_stop_on_error {
            return Err(SignalAbort {
                path: path.to_path_buf(),
                message,
            });
        }
        Ok(())
    }

    pub(crate) fn record_warning(&mut self, message: String) {
        if self.is_verbose() {
            warn!("{message}");
        }
        self.builder_sync_report.add_warning(message);
    }
}

/// Synchronize `dir_destination` with `dir_source`, one way.
///
/// Files absent from the destination or differing in size are copied,
/// missing directories and symlinks are created, and (when enabled)
/// destination-only regular files are deleted. Behavior is controlled by
/// [`SpecSyncOptions`].
///
/// The destination root must already exist; a missing root is fatal
/// regardless of `if_stop_on_error`. Per-entry failures are collected in the
/// returned [`ReportSync`] unless `if_stop_on_error` is set, in which case the
/// first one ends the run with [`SyncTreeError::Aborted`].
///
/// When anything was copied or deleted the filesystems are flushed with
/// `sync(2)` before returning.
pub fn sync_tree<P, Q>(
    dir_source: P,
    dir_destination: Q,
    spec_sync_options: SpecSyncOptions,
) -> Result<ReportSync, SyncTreeError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let path_dir_src = dir_source.as_ref();
    let path_dir_dst = dir_destination.as_ref();
    let mut spec_sync_ctx = SpecSyncContext::new(spec_sync_options)?;

    let record_dir_dst = fs::metadata(path_dir_dst).map_err(|source| {
        SyncTreeError::DestinationRootUnavailable {
            path: path_dir_dst.to_path_buf(),
            source,
        }
    })?;
    if !record_dir_dst.is_dir() {
        return Err(SyncTreeError::DestinationRootUnavailable {
            path: path_dir_dst.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
        });
    }
    spec_sync_ctx.id_dir_dst_root = Some(SpecFileRecord::from_metadata(&record_dir_dst).identity());

    if let Err(signal) = walk_directory(path_dir_src, path_dir_dst, 1, &mut spec_sync_ctx) {
        let outcome = if spec_sync_ctx.builder_sync_report.has_changes() {
            EnumSyncOutcome::Updated
        } else {
            EnumSyncOutcome::NothingToUpdate
        };
        return Err(SyncTreeError::Aborted {
            path: signal.path,
            message: signal.message,
            report: Box::new(spec_sync_ctx.builder_sync_report.build(outcome)),
        });
    }

    if !spec_sync_ctx.builder_sync_report.has_changes() {
        if spec_sync_ctx.is_verbose() {
            info!("Nothing to update");
        }
        return Ok(spec_sync_ctx
            .builder_sync_report
            .build(EnumSyncOutcome::NothingToUpdate));
    }

    if spec_sync_ctx.is_verbose() {
        info!("Syncing...");
    }
    flush_filesystems();
    Ok(spec_sync_ctx
        .builder_sync_report
        .build(EnumSyncOutcome::Updated))
}

fn flush_filesystems() {
    #[cfg(unix)]
    rustix::fs::sync();
}

fn walk_directory(
    path_dir_src: &Path,
    path_dir_dst: &Path,
    n_depth: usize,
    spec_sync_ctx: &mut SpecSyncContext,
) -> Result<(), SignalAbort> {
    let Some(spec_snapshot_src) = list_directory(path_dir_src, false, spec_sync_ctx)? else {
        return Ok(());
    };

    let if_delete_unmatched = spec_sync_ctx.spec_sync_options.if_delete_unmatched;
    if spec_snapshot_src.is_empty() {
        if spec_sync_ctx.is_verbose_high() {
            debug!(depth = n_depth, path = %path_dir_src.display(), "No files in directory");
        }
        if !if_delete_unmatched {
            return Ok(());
        }
    }

    let spec_snapshot_dst = list_directory(path_dir_dst, true, spec_sync_ctx)?.unwrap_or_default();

    if if_delete_unmatched {
        delete_unmatched_files(
            path_dir_dst,
            &spec_snapshot_src,
            &spec_snapshot_dst,
            n_depth,
            spec_sync_ctx,
        )?;
    }

    for (name, record_src) in spec_snapshot_src.iter() {
        let path_src = path_dir_src.join(name);
        match record_src.kind {
            EnumSyncEntryKind::File => reconcile_file(
                name,
                &path_src,
                path_dir_dst,
                record_src,
                &spec_snapshot_dst,
                n_depth,
                spec_sync_ctx,
            )?,
            EnumSyncEntryKind::Directory => {
                if spec_sync_ctx.id_dir_dst_root == Some(record_src.identity()) {
                    spec_sync_ctx.record_warning(format!(
                        "Cannot copy directory \"{}\" into itself",
                        path_src.display()
                    ));
                    continue;
                }
                let path_dst = match spec_snapshot_dst
                    .find(name, spec_sync_ctx.spec_sync_options.if_ignore_case)
                {
                    Some((name_dst, _)) => path_dir_dst.join(name_dst),
                    None => path_dir_dst.join(name),
                };
                if handle_dir_entry(&path_src, &path_dst, record_src, n_depth, spec_sync_ctx)? {
                    if spec_sync_ctx.is_verbose_high() {
                        debug!(depth = n_depth, path = %path_src.display(), "Descending into directory");
                    }
                    walk_directory(&path_src, &path_dst, n_depth + 1, spec_sync_ctx)?;
                }
            }
            EnumSyncEntryKind::Symlink => reconcile_symlink(
                name,
                &path_src,
                path_dir_dst,
                record_src,
                &spec_snapshot_dst,
                n_depth,
                spec_sync_ctx,
            )?,
            EnumSyncEntryKind::Other => {
                if spec_sync_ctx.is_verbose_high() {
                    debug!(depth = n_depth, path = %path_src.display(), "Ignoring special directory entry");
                }
            }
        }
    }

    if n_depth > 1 && spec_sync_ctx.is_verbose_high() {
        debug!(depth = n_depth, path = %path_dir_src.display(), "Leaving directory");
    }
    Ok(())
}

/// Delete destination regular files with no same-named source entry.
///
/// Directories are never removed here.
fn delete_unmatched_files(
    path_dir_dst: &Path,
    spec_snapshot_src: &SpecDirSnapshot,
    spec_snapshot_dst: &SpecDirSnapshot,
    n_depth: usize,
    spec_sync_ctx: &mut SpecSyncContext,
) -> Result<(), SignalAbort> {
    let if_ignore_case = spec_sync_ctx.spec_sync_options.if_ignore_case;
    for (name, record_dst) in spec_snapshot_dst.iter() {
        if record_dst.kind != EnumSyncEntryKind::File
            || spec_snapshot_src.find(name, if_ignore_case).is_some()
        {
            continue;
        }

        let path_dst = path_dir_dst.join(name);
        if spec_sync_ctx.is_verbose() {
            info!(depth = n_depth, path = %path_dst.display(), "Deleting unmatched file");
        }
        match fs::remove_file(&path_dst) {
            Ok(()) => spec_sync_ctx.builder_sync_report.add_unmatched_deleted(),
            Err(e) => spec_sync_ctx.record_error(
                &path_dst,
                format!("Failed to delete {} ({e})", path_dst.display()),
            )?,
        }
    }
    Ok(())
}

/// Make sure a destination directory exists for `path_src`.
///
/// Returns whether the walker should descend into it.
fn handle_dir_entry(
    path_src: &Path,
    path_dst: &Path,
    record_src: &SpecFileRecord,
    n_depth: usize,
    spec_sync_ctx: &mut SpecSyncContext,
) -> Result<bool, SignalAbort> {
    match create_dir(path_dst) {
        Ok(()) => {
            if spec_sync_ctx.is_verbose() {
                info!(depth = n_depth, path = %path_dst.display(), "Created directory");
            }
            spec_sync_ctx.builder_sync_report.add_dir_copied();
            apply_metadata(path_src, path_dst, record_src, false, spec_sync_ctx);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match fs::symlink_metadata(path_dst) {
            Ok(meta_dst) if meta_dst.is_dir() => Ok(true),
            Ok(_) => {
                spec_sync_ctx.record_error(
                    path_dst,
                    format!(
                        "Destination \"{}\" exists and it is not a directory.",
                        path_dst.display()
                    ),
                )?;
                Ok(false)
            }
            Err(e) => {
                spec_sync_ctx.record_error(
                    path_dst,
                    format!("Failed to stat {} ({e})", path_dst.display()),
                )?;
                Ok(false)
            }
        },
        Err(e) => {
            spec_sync_ctx.record_error(
                path_dst,
                format!("Failed to create directory {} ({e})", path_dst.display()),
            )?;
            Ok(false)
        }
    }
}

fn create_dir(path_dst: &Path) -> io::Result<()> {
    let mut cfg_dir = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        cfg_dir.mode(N_MODE_DIR_CREATE);
    }
    cfg_dir.create(path_dst)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;
    use tracing_test::traced_test;

    use super::sync_tree;
    use crate::spec::{
        EnumSyncOutcome, EnumSyncPatternMode, EnumSyncVerbosity, SpecSyncOptions, SyncTreeError,
    };

    fn write_bytes(path: &Path, raw_data: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, raw_data).expect("write bytes");
    }

    fn make_roots(tmp: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).expect("mkdir src");
        fs::create_dir_all(&dst).expect("mkdir dst");
        (src, dst)
    }

    fn options_continue() -> SpecSyncOptions {
        SpecSyncOptions {
            if_stop_on_error: false,
            ..SpecSyncOptions::default()
        }
    }

    #[test]
    fn sync_tree_copies_nested_tree_into_empty_destination() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        let raw_f1: Vec<u8> = (0..100_u8).collect();
        write_bytes(&src.join("f1"), &raw_f1);
        write_bytes(&src.join("sub/f2"), b"12345");

        let report = sync_tree(&src, &dst, SpecSyncOptions::default()).expect("sync tree");
        assert_eq!(report.error_count(), 0);
        assert_eq!(report.cnt_files_copied, 2);
        assert_eq!(report.cnt_dirs_copied, 1);
        assert_eq!(report.cnt_total_copied, 3);
        assert_eq!(report.n_bytes_copied, 105);
        assert_eq!(report.outcome, EnumSyncOutcome::Updated);
        assert_eq!(fs::read(dst.join("f1")).expect("read f1"), raw_f1);
        assert_eq!(fs::read(dst.join("sub/f2")).expect("read f2"), b"12345");
    }

    #[test]
    fn sync_tree_second_run_has_nothing_to_update() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("a.txt"), b"a");
        write_bytes(&src.join("d1/d2/b.txt"), b"bb");
        #[cfg(unix)]
        std::os::unix::fs::symlink("a.txt", src.join("link")).expect("symlink");

        let report_first = sync_tree(&src, &dst, SpecSyncOptions::default()).expect("first run");
        assert!(report_first.cnt_total_copied > 0);

        let report_second = sync_tree(&src, &dst, SpecSyncOptions::default()).expect("second run");
        assert_eq!(report_second.cnt_total_copied, 0);
        assert_eq!(report_second.outcome, EnumSyncOutcome::NothingToUpdate);
        assert_eq!(report_second.error_count(), 0);
    }

    #[test]
    fn sync_tree_recopies_file_with_different_size() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("data.txt"), b"new longer body");
        write_bytes(&dst.join("data.txt"), b"old");

        let report = sync_tree(&src, &dst, SpecSyncOptions::default()).expect("sync tree");
        assert_eq!(report.cnt_files_copied, 1);
        assert_eq!(
            fs::read_to_string(dst.join("data.txt")).expect("read"),
            "new longer body"
        );
    }

    #[test]
    fn sync_tree_same_size_is_trusted_even_with_content_compare() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("same.txt"), b"AAAA");
        write_bytes(&dst.join("same.txt"), b"BBBB");

        for if_compare_contents in [false, true] {
            let spec_sync_options = SpecSyncOptions {
                if_compare_contents,
                ..SpecSyncOptions::default()
            };
            let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
            assert_eq!(report.cnt_files_copied, 0);
            assert_eq!(report.error_count(), 0);
        }
        assert_eq!(fs::read(dst.join("same.txt")).expect("read"), b"BBBB");
    }

    #[test]
    fn sync_tree_wildcard_filter_restricts_files() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("note.txt"), b"note");
        write_bytes(&src.join("image.png"), b"png");

        let spec_sync_options = SpecSyncOptions {
            patterns: vec!["*.txt".to_string()],
            rule_pattern: EnumSyncPatternMode::Wildcard,
            ..SpecSyncOptions::default()
        };
        let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        assert_eq!(report.cnt_files_copied, 1);
        assert!(dst.join("note.txt").exists());
        assert!(!dst.join("image.png").exists());
    }

    #[test]
    fn sync_tree_wildcard_brackets_match_literally() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("report[1].txt"), b"literal");
        write_bytes(&src.join("report1.txt"), b"class");

        let spec_sync_options = SpecSyncOptions {
            patterns: vec!["report[1].txt".to_string()],
            rule_pattern: EnumSyncPatternMode::Wildcard,
            ..SpecSyncOptions::default()
        };
        let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        assert_eq!(report.cnt_files_copied, 1);
        assert!(dst.join("report[1].txt").exists());
        assert!(!dst.join("report1.txt").exists());
    }

    #[test]
    fn sync_tree_filter_does_not_apply_to_directories() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("docs/readme.txt"), b"r");
        write_bytes(&src.join("docs/logo.png"), b"p");

        let spec_sync_options = SpecSyncOptions {
            patterns: vec![r"\.txt$".to_string()],
            rule_pattern: EnumSyncPatternMode::RegexPartial,
            ..SpecSyncOptions::default()
        };
        let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        assert_eq!(report.cnt_dirs_copied, 1);
        assert!(dst.join("docs/readme.txt").exists());
        assert!(!dst.join("docs/logo.png").exists());
    }

    #[test]
    fn sync_tree_skips_dot_entries_unless_enabled() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join(".profile"), b"p");
        write_bytes(&src.join(".config/app.toml"), b"c");
        write_bytes(&src.join("visible"), b"v");

        sync_tree(&src, &dst, SpecSyncOptions::default()).expect("sync tree");
        assert!(dst.join("visible").exists());
        assert!(!dst.join(".profile").exists());
        assert!(!dst.join(".config").exists());

        let spec_sync_options = SpecSyncOptions {
            if_include_dot_entries: true,
            ..SpecSyncOptions::default()
        };
        let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        assert_eq!(report.cnt_files_copied, 2);
        assert!(dst.join(".profile").exists());
        assert!(dst.join(".config/app.toml").exists());
    }

    #[test]
    fn sync_tree_deletes_unmatched_files_but_not_directories() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("keep.txt"), b"k");
        write_bytes(&dst.join("keep.txt"), b"k");
        write_bytes(&dst.join("stale.txt"), b"s");
        write_bytes(&dst.join("stale_dir/inner.txt"), b"i");

        let spec_sync_options = SpecSyncOptions {
            if_delete_unmatched: true,
            ..SpecSyncOptions::default()
        };
        let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        assert_eq!(report.cnt_unmatched_deleted, 1);
        assert_eq!(report.cnt_total_copied, 0);
        assert_eq!(report.outcome, EnumSyncOutcome::Updated);
        assert!(dst.join("keep.txt").exists());
        assert!(!dst.join("stale.txt").exists());
        assert!(dst.join("stale_dir/inner.txt").exists());
    }

    #[test]
    fn sync_tree_deletes_in_destination_of_empty_source_directory() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        fs::create_dir_all(src.join("empty")).expect("mkdir empty");
        write_bytes(&dst.join("empty/leftover.txt"), b"l");

        let spec_sync_options = SpecSyncOptions {
            if_delete_unmatched: true,
            ..SpecSyncOptions::default()
        };
        let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        assert_eq!(report.cnt_unmatched_deleted, 1);
        assert!(!dst.join("empty/leftover.txt").exists());
    }

    #[test]
    fn sync_tree_ignore_case_matches_existing_names() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("note.txt"), b"1234");
        write_bytes(&dst.join("NOTE.TXT"), b"abcd");

        let spec_sync_options = SpecSyncOptions {
            if_ignore_case: true,
            if_delete_unmatched: true,
            ..SpecSyncOptions::default()
        };
        let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        assert_eq!(report.cnt_files_copied, 0);
        assert_eq!(report.cnt_unmatched_deleted, 0);
        assert!(dst.join("NOTE.TXT").exists());
    }

    #[test]
    fn sync_tree_ignore_case_reuses_existing_directory() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("sub/a.txt"), b"a");
        fs::create_dir_all(dst.join("SUB")).expect("mkdir SUB");

        let spec_sync_options = SpecSyncOptions {
            if_ignore_case: true,
            ..SpecSyncOptions::default()
        };
        let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        assert_eq!(report.cnt_dirs_copied, 0);
        assert_eq!(report.cnt_files_copied, 1);
        assert!(dst.join("SUB/a.txt").exists());
    }

    #[test]
    fn sync_tree_rejects_ignore_case_with_regex() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);

        let spec_sync_options = SpecSyncOptions {
            if_ignore_case: true,
            rule_pattern: EnumSyncPatternMode::RegexFull,
            ..SpecSyncOptions::default()
        };
        let err = sync_tree(&src, &dst, spec_sync_options).expect_err("must reject");
        assert!(matches!(err, SyncTreeError::ConflictingOptions(_)));
    }

    #[test]
    fn sync_tree_missing_destination_root_is_fatal() {
        let tmp = TempDir::new().expect("tempdir");
        let src = tmp.path().join("src");
        write_bytes(&src.join("a.txt"), b"a");

        for if_stop_on_error in [true, false] {
            let spec_sync_options = SpecSyncOptions {
                if_stop_on_error,
                ..SpecSyncOptions::default()
            };
            let err = sync_tree(&src, tmp.path().join("missing"), spec_sync_options)
                .expect_err("missing destination must fail");
            assert!(matches!(
                err,
                SyncTreeError::DestinationRootUnavailable { .. }
            ));
        }
    }

    #[test]
    fn sync_tree_missing_source_is_recoverable_error() {
        let tmp = TempDir::new().expect("tempdir");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&dst).expect("mkdir dst");

        let report =
            sync_tree(tmp.path().join("nope"), &dst, options_continue()).expect("report");
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.outcome, EnumSyncOutcome::NothingToUpdate);
    }

    #[test]
    fn sync_tree_type_mismatch_stops_or_continues() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("a_clash.txt"), b"file in source");
        write_bytes(&src.join("b_fine.txt"), b"fine");
        fs::create_dir_all(dst.join("a_clash.txt")).expect("mkdir clash");

        let err = sync_tree(&src, &dst, SpecSyncOptions::default()).expect_err("must stop");
        let SyncTreeError::Aborted { path, report, .. } = err else {
            panic!("expected Aborted");
        };
        assert_eq!(path, dst.join("a_clash.txt"));
        assert_eq!(report.error_count(), 1);
        assert!(!dst.join("b_fine.txt").exists());

        let report = sync_tree(&src, &dst, options_continue()).expect("continue");
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.cnt_files_copied, 1);
        assert!(dst.join("a_clash.txt").is_dir());
        assert!(dst.join("b_fine.txt").exists());
    }

    #[test]
    fn sync_tree_directory_over_existing_file_is_error() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("sub/inner.txt"), b"i");
        write_bytes(&dst.join("sub"), b"not a dir");

        let report = sync_tree(&src, &dst, options_continue()).expect("report");
        assert_eq!(report.error_count(), 1);
        assert!(report.errors[0].exception.contains("not a directory"));
        assert_eq!(fs::read(dst.join("sub")).expect("read"), b"not a dir");
    }

    #[test]
    fn sync_tree_existing_directory_is_recursed_but_not_counted() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("sub/new.txt"), b"n");
        fs::create_dir_all(dst.join("sub")).expect("mkdir dst sub");

        let report = sync_tree(&src, &dst, SpecSyncOptions::default()).expect("sync tree");
        assert_eq!(report.cnt_dirs_copied, 0);
        assert_eq!(report.cnt_files_copied, 1);
        assert!(dst.join("sub/new.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn sync_tree_skips_destination_nested_in_source() {
        let tmp = TempDir::new().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = src.join("mirror");
        write_bytes(&src.join("a.txt"), b"a");
        fs::create_dir_all(&dst).expect("mkdir dst");

        let report = sync_tree(&src, &dst, SpecSyncOptions::default()).expect("sync tree");
        assert_eq!(report.cnt_files_copied, 1);
        assert_eq!(report.cnt_dirs_copied, 0);
        assert!(report.warnings.iter().any(|w| w.contains("into itself")));
        assert!(!dst.join("mirror").exists());
    }

    #[cfg(unix)]
    #[test]
    fn sync_tree_copies_metadata() {
        use filetime::{FileTime, set_file_times};
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        let path_file_src = src.join("meta.txt");
        write_bytes(&path_file_src, b"meta");
        fs::set_permissions(&path_file_src, fs::Permissions::from_mode(0o640))
            .expect("set permissions");
        set_file_times(
            &path_file_src,
            FileTime::from_unix_time(1_700_000_010, 0),
            FileTime::from_unix_time(1_700_000_020, 500),
        )
        .expect("set times");

        let report = sync_tree(&src, &dst, SpecSyncOptions::default()).expect("sync tree");
        assert_eq!(report.error_count(), 0);
        assert_eq!(report.warning_count(), 0);

        let meta_dst = fs::metadata(dst.join("meta.txt")).expect("dst metadata");
        assert_eq!(meta_dst.permissions().mode() & 0o777, 0o640);
        assert_eq!(
            FileTime::from_last_modification_time(&meta_dst),
            FileTime::from_unix_time(1_700_000_020, 0)
        );
    }

    #[cfg(unix)]
    #[test]
    fn sync_tree_without_metadata_keeps_fresh_mtime() {
        use filetime::{FileTime, set_file_times};

        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        let path_file_src = src.join("plain.txt");
        write_bytes(&path_file_src, b"plain");
        set_file_times(
            &path_file_src,
            FileTime::from_unix_time(1_000_000_000, 0),
            FileTime::from_unix_time(1_000_000_000, 0),
        )
        .expect("set times");

        let spec_sync_options = SpecSyncOptions {
            if_copy_metadata: false,
            ..SpecSyncOptions::default()
        };
        sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        let meta_dst = fs::metadata(dst.join("plain.txt")).expect("dst metadata");
        assert_ne!(
            FileTime::from_last_modification_time(&meta_dst),
            FileTime::from_unix_time(1_000_000_000, 0)
        );
    }

    #[cfg(unix)]
    #[test]
    fn sync_tree_copies_xattrs_when_enabled() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        let path_file_src = src.join("tagged.txt");
        write_bytes(&path_file_src, b"tagged");
        if xattr::set(&path_file_src, "user.filesync_tag", b"blue").is_err() {
            return;
        }

        let spec_sync_options = SpecSyncOptions {
            if_copy_xattrs: true,
            ..SpecSyncOptions::default()
        };
        let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        assert!(report.cnt_xattr_copied >= 1);
        assert!(report.cnt_xattr_objects >= 1);
        let raw_value = xattr::get(dst.join("tagged.txt"), "user.filesync_tag")
            .expect("get xattr")
            .expect("xattr exists");
        assert_eq!(raw_value, b"blue");
    }

    #[cfg(unix)]
    #[test]
    fn sync_tree_creates_missing_symlink() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        symlink("../elsewhere/target", src.join("link")).expect("symlink");

        let report = sync_tree(&src, &dst, SpecSyncOptions::default()).expect("sync tree");
        assert_eq!(report.cnt_symlinks_copied, 1);
        assert_eq!(report.error_count(), 0);
        assert_eq!(
            fs::read_link(dst.join("link")).expect("read link"),
            Path::new("../elsewhere/target")
        );
    }

    #[cfg(unix)]
    #[test]
    fn sync_tree_leaves_matching_symlink_alone() {
        use std::os::unix::fs::{MetadataExt, symlink};

        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        symlink("target", src.join("link")).expect("symlink src");
        symlink("target", dst.join("link")).expect("symlink dst");
        let n_ino_before = fs::symlink_metadata(dst.join("link")).expect("lstat").ino();

        for if_compare_contents in [false, true] {
            let spec_sync_options = SpecSyncOptions {
                if_compare_contents,
                ..SpecSyncOptions::default()
            };
            let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
            assert_eq!(report.cnt_symlinks_copied, 0);
            assert_eq!(report.warning_count(), 0);
        }

        let n_ino_after = fs::symlink_metadata(dst.join("link")).expect("lstat").ino();
        assert_eq!(n_ino_before, n_ino_after);
    }

    #[cfg(unix)]
    #[test]
    fn sync_tree_stale_symlink_warns_or_replaces() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        symlink("new_target", src.join("link")).expect("symlink src");
        symlink("old_target", dst.join("link")).expect("symlink dst");

        let report = sync_tree(&src, &dst, SpecSyncOptions::default()).expect("sync tree");
        assert_eq!(report.cnt_symlinks_copied, 0);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.error_count(), 0);
        assert_eq!(
            fs::read_link(dst.join("link")).expect("read link"),
            Path::new("old_target")
        );

        let spec_sync_options = SpecSyncOptions {
            if_compare_contents: true,
            ..SpecSyncOptions::default()
        };
        let report = sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
        assert_eq!(report.cnt_symlinks_copied, 1);
        assert_eq!(
            fs::read_link(dst.join("link")).expect("read link"),
            Path::new("new_target")
        );
    }

    #[cfg(unix)]
    fn run_stale_symlink(verbosity: EnumSyncVerbosity) -> usize {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        symlink("new_target", src.join("link")).expect("symlink src");
        symlink("old_target", dst.join("link")).expect("symlink dst");

        let spec_sync_options = SpecSyncOptions {
            verbosity,
            ..SpecSyncOptions::default()
        };
        sync_tree(&src, &dst, spec_sync_options)
            .expect("sync tree")
            .warning_count()
    }

    #[cfg(unix)]
    #[test]
    #[traced_test]
    fn sync_tree_logs_warnings_at_normal_verbosity() {
        assert_eq!(run_stale_symlink(EnumSyncVerbosity::Normal), 1);
        assert!(logs_contain("already exists but"));
        assert!(logs_contain("Nothing to update"));
    }

    #[cfg(unix)]
    #[test]
    #[traced_test]
    fn sync_tree_quiet_verbosity_still_counts_warnings() {
        assert_eq!(run_stale_symlink(EnumSyncVerbosity::None), 1);
        assert!(!logs_contain("already exists but"));
        assert!(!logs_contain("Nothing to update"));
    }

    #[test]
    #[traced_test]
    fn sync_tree_high_verbosity_logs_skipped_entries() {
        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        write_bytes(&src.join("same.txt"), b"AAAA");
        write_bytes(&dst.join("same.txt"), b"AAAA");

        for verbosity in [EnumSyncVerbosity::Normal, EnumSyncVerbosity::High] {
            let spec_sync_options = SpecSyncOptions {
                verbosity,
                ..SpecSyncOptions::default()
            };
            sync_tree(&src, &dst, spec_sync_options).expect("sync tree");
            if verbosity == EnumSyncVerbosity::Normal {
                assert!(!logs_contain("same size"));
            }
        }
        assert!(logs_contain("same size"));
    }

    #[cfg(unix)]
    #[test]
    fn sync_tree_symlink_over_regular_file_is_error() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        symlink("target", src.join("entry")).expect("symlink src");
        write_bytes(&dst.join("entry"), b"regular");

        let report = sync_tree(&src, &dst, options_continue()).expect("report");
        assert_eq!(report.error_count(), 1);
        assert!(report.errors[0].exception.contains("not a symlink"));
        assert!(dst.join("entry").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn sync_tree_never_writes_through_destination_symlink() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&outside).expect("mkdir outside");
        write_bytes(&src.join("a.txt"), b"payload");
        symlink(outside.join("out.txt"), dst.join("a.txt")).expect("symlink dst");

        let report = sync_tree(&src, &dst, options_continue()).expect("report");
        assert_eq!(report.error_count(), 1);
        assert!(!outside.join("out.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn sync_tree_ignores_special_entries() {
        use std::os::unix::net::UnixListener;

        let tmp = TempDir::new().expect("tempdir");
        let (src, dst) = make_roots(&tmp);
        let _listener = UnixListener::bind(src.join("app.sock")).expect("bind socket");
        write_bytes(&src.join("data.txt"), b"d");

        let report = sync_tree(&src, &dst, SpecSyncOptions::default()).expect("sync tree");
        assert_eq!(report.error_count(), 0);
        assert_eq!(report.cnt_total_copied, 1);
        assert!(!dst.join("app.sock").exists());
    }
}
