//! Ownership, permission, timestamp and extended-attribute propagation.

use std::io;
use std::path::Path;

use tracing::debug;

use crate::snapshot::SpecFileRecord;
use crate::sync::SpecSyncContext;

/// Apply source metadata to `path_dst` according to the run options.
///
/// Returns `false` on partial failure. Failures are warnings only; they never
/// count as errors and never stop the run. Extended attributes are attempted
/// only when the standard step succeeded (or was disabled).
pub(crate) fn apply_metadata(
    path_src: &Path,
    path_dst: &Path,
    record_src: &SpecFileRecord,
    if_is_symlink: bool,
    spec_sync_ctx: &mut SpecSyncContext,
) -> bool {
    if spec_sync_ctx.spec_sync_options.if_copy_metadata
        && let Err(e) = copy_file_attrs(path_dst, record_src, if_is_symlink)
    {
        spec_sync_ctx.record_warning(format!(
            "Couldn't set some or all metadata on {} ({e})",
            path_dst.display()
        ));
        return false;
    }

    if spec_sync_ctx.spec_sync_options.if_copy_xattrs {
        match copy_xattrs(path_src, path_dst, if_is_symlink) {
            Ok(cnt_keys) => {
                if cnt_keys > 0 && spec_sync_ctx.is_verbose_high() {
                    debug!(path = %path_dst.display(), keys = cnt_keys, "Copied extended attributes");
                }
                spec_sync_ctx.builder_sync_report.add_xattrs_copied(cnt_keys);
            }
            Err(e) => {
                spec_sync_ctx.record_warning(format!(
                    "Couldn't set extended attributes on {} ({e})",
                    path_dst.display()
                ));
                return false;
            }
        }
    }
    true
}

/// Set owner, group, permission bits and second-resolution timestamps.
///
/// Every step is attempted; the first failure is returned. Symlink
/// permissions are left alone since Linux does not support changing them.
#[cfg(unix)]
pub fn copy_file_attrs(
    path_dst: &Path,
    record_src: &SpecFileRecord,
    if_is_symlink: bool,
) -> io::Result<()> {
    use std::fs;
    use std::os::unix::fs::{PermissionsExt, lchown};

    use filetime::{FileTime, set_symlink_file_times};

    let res_owner = lchown(path_dst, Some(record_src.n_uid), Some(record_src.n_gid));
    let res_mode = if if_is_symlink {
        Ok(())
    } else {
        fs::set_permissions(path_dst, fs::Permissions::from_mode(record_src.n_mode))
    };
    let res_times = set_symlink_file_times(
        path_dst,
        FileTime::from_unix_time(record_src.n_atime, 0),
        FileTime::from_unix_time(record_src.n_mtime, 0),
    );

    match [res_owner, res_mode, res_times]
        .into_iter()
        .find_map(Result::err)
    {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
pub fn copy_file_attrs(
    path_dst: &Path,
    record_src: &SpecFileRecord,
    if_is_symlink: bool,
) -> io::Result<()> {
    use filetime::{FileTime, set_file_times};

    if if_is_symlink {
        return Ok(());
    }
    set_file_times(
        path_dst,
        FileTime::from_unix_time(record_src.n_atime, 0),
        FileTime::from_unix_time(record_src.n_mtime, 0),
    )
}

/// Copy every extended attribute from `path_src` to `path_dst`.
///
/// Uses the no-follow variants for symlinks. Returns the number of keys copied.
#[cfg(unix)]
pub fn copy_xattrs(path_src: &Path, path_dst: &Path, if_is_symlink: bool) -> io::Result<u64> {
    let iter_xattr_names = if if_is_symlink {
        xattr::list(path_src)?
    } else {
        xattr::list_deref(path_src)?
    };

    let mut cnt_keys = 0;
    for name in iter_xattr_names {
        let raw_value = if if_is_symlink {
            xattr::get(path_src, &name)?
        } else {
            xattr::get_deref(path_src, &name)?
        };
        let Some(raw_value) = raw_value else {
            continue;
        };
        if if_is_symlink {
            xattr::set(path_dst, &name, &raw_value)?;
        } else {
            xattr::set_deref(path_dst, &name, &raw_value)?;
        }
        cnt_keys += 1;
    }
    Ok(cnt_keys)
}

#[cfg(not(unix))]
pub fn copy_xattrs(_path_src: &Path, _path_dst: &Path, _if_is_symlink: bool) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Extended attributes are unsupported on this platform",
    ))
}
