//! Symlink reconciliation.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::meta::apply_metadata;
use crate::snapshot::{SpecDirSnapshot, SpecFileRecord};
use crate::spec::{EnumSyncEntryKind, SignalAbort};
use crate::sync::SpecSyncContext;

/// Bring one destination symlink in line with its source.
///
/// - no destination object: create the link;
/// - destination symlink with the same target: leave it;
/// - destination symlink with another target: warn, or replace it when
///   `if_compare_contents` is set;
/// - destination object of another kind: recorded as an error, left alone.
pub(crate) fn reconcile_symlink(
    name: &OsStr,
    path_src: &Path,
    path_dir_dst: &Path,
    record_src: &SpecFileRecord,
    spec_snapshot_dst: &SpecDirSnapshot,
    n_depth: usize,
    spec_sync_ctx: &mut SpecSyncContext,
) -> Result<(), SignalAbort> {
    if !spec_sync_ctx.spec_name_filter.is_match(name) {
        if spec_sync_ctx.is_verbose_high() {
            debug!(depth = n_depth, path = %path_src.display(), "Not copying symlink as the name doesn't match any pattern");
        }
        return Ok(());
    }

    let if_ignore_case = spec_sync_ctx.spec_sync_options.if_ignore_case;
    let found_dst = spec_snapshot_dst.find(name, if_ignore_case);
    let path_dst = match found_dst {
        Some((name_dst, _)) => path_dir_dst.join(name_dst),
        None => path_dir_dst.join(name),
    };

    if let Some((_, record_dst)) = found_dst
        && record_dst.kind != EnumSyncEntryKind::Symlink
    {
        spec_sync_ctx.record_error(
            &path_dst,
            format!(
                "Destination \"{}\" exists and it is not a symlink.",
                path_dst.display()
            ),
        )?;
        return Ok(());
    }

    let target_src = match fs::read_link(path_src) {
        Ok(v) => v,
        Err(e) => {
            spec_sync_ctx.record_error(
                path_src,
                format!("Failed to read symlink {} ({e})", path_src.display()),
            )?;
            return Ok(());
        }
    };

    if found_dst.is_some() {
        let target_dst = match fs::read_link(&path_dst) {
            Ok(v) => v,
            Err(e) => {
                spec_sync_ctx.record_error(
                    &path_dst,
                    format!("Failed to read symlink {} ({e})", path_dst.display()),
                )?;
                return Ok(());
            }
        };

        if target_dst == target_src {
            if spec_sync_ctx.is_verbose_high() {
                debug!(depth = n_depth, path = %path_dst.display(), "Symlink already exists and is set correctly");
            }
            return Ok(());
        }

        if !spec_sync_ctx.spec_sync_options.if_compare_contents {
            spec_sync_ctx.record_warning(format!(
                "Symlink \"{}\" already exists but -> \"{}\"",
                path_dst.display(),
                target_dst.display()
            ));
            return Ok(());
        }

        if spec_sync_ctx.is_verbose() {
            info!(
                depth = n_depth,
                path = %path_dst.display(),
                target = %target_dst.display(),
                "Deleting stale symlink"
            );
        }
        if let Err(e) = fs::remove_file(&path_dst) {
            spec_sync_ctx.record_error(
                &path_dst,
                format!("Failed to delete symlink {} ({e})", path_dst.display()),
            )?;
            return Ok(());
        }
    }

    if let Err(e) = create_symbolic_link(&target_src, path_src, &path_dst) {
        spec_sync_ctx.record_error(
            &path_dst,
            format!("Failed to create symlink {} ({e})", path_dst.display()),
        )?;
        return Ok(());
    }
    if spec_sync_ctx.is_verbose() {
        info!(
            depth = n_depth,
            path = %path_dst.display(),
            target = %target_src.display(),
            "Created symlink"
        );
    }
    spec_sync_ctx.builder_sync_report.add_symlink_copied();
    apply_metadata(path_src, &path_dst, record_src, true, spec_sync_ctx);
    Ok(())
}

/// Create `path_link` pointing at `target`.
///
/// `path_src_link` is only consulted on Windows to choose between a file and
/// a directory link.
pub(crate) fn create_symbolic_link(
    target: &Path,
    path_src_link: &Path,
    path_link: &Path,
) -> io::Result<()> {
    #[cfg(unix)]
    {
        let _ = path_src_link;
        std::os::unix::fs::symlink(target, path_link)
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::{symlink_dir, symlink_file};
        if path_src_link.is_dir() {
            symlink_dir(target, path_link)
        } else {
            symlink_file(target, path_link)
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (target, path_src_link, path_link);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Symbolic links are unsupported on this platform",
        ))
    }
}
