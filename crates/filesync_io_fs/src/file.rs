//! Regular-file reconciliation and the raw byte-level primitives it uses.

use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::meta::apply_metadata;
use crate::snapshot::{SpecDirSnapshot, SpecFileRecord};
use crate::spec::{EnumSyncEntryKind, SignalAbort};
use crate::sync::SpecSyncContext;
use crate::util::format_size;

/// Copy buffer size.
pub const N_COPY_CHUNK_BYTES: usize = 10_000;

/// Bring one destination regular file in line with its source.
///
/// A destination file of equal size is left alone. With `if_compare_contents`
/// the contents are compared as well, but a same-sized file is still not
/// re-copied when they differ.
pub(crate) fn reconcile_file(
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
            debug!(depth = n_depth, path = %path_src.display(), "Not copying file as the name doesn't match any pattern");
        }
        return Ok(());
    }

    let if_ignore_case = spec_sync_ctx.spec_sync_options.if_ignore_case;
    let mut path_dst = path_dir_dst.join(name);
    if let Some((name_dst, record_dst)) = spec_snapshot_dst.find(name, if_ignore_case) {
        path_dst = path_dir_dst.join(name_dst);
        if record_dst.kind != EnumSyncEntryKind::File {
            spec_sync_ctx.record_error(
                &path_dst,
                format!(
                    "Destination \"{}\" exists and it is not a regular file.",
                    path_dst.display()
                ),
            )?;
            return Ok(());
        }

        if record_dst.n_size == record_src.n_size {
            if spec_sync_ctx.spec_sync_options.if_compare_contents {
                match identical_contents(path_src, &path_dst) {
                    Ok(true) => {
                        if spec_sync_ctx.is_verbose_high() {
                            debug!(depth = n_depth, path = %path_dst.display(), "Not copying as it has the same contents");
                        }
                        return Ok(());
                    }
                    Ok(false) => {}
                    Err(e) => spec_sync_ctx.record_error(
                        &path_dst,
                        format!(
                            "Failed to compare {} with {} ({e})",
                            path_src.display(),
                            path_dst.display()
                        ),
                    )?,
                }
            }
            if spec_sync_ctx.is_verbose_high() {
                debug!(depth = n_depth, path = %path_dst.display(), "Not copying as it is the same size");
            }
            return Ok(());
        }
    }

    match copy_bytes(path_src, &path_dst, record_src.n_mode) {
        Ok(n_bytes) => {
            if spec_sync_ctx.is_verbose() {
                info!(
                    depth = n_depth,
                    src = %path_src.display(),
                    dst = %path_dst.display(),
                    "Copied file ({})",
                    format_size(n_bytes)
                );
            }
            spec_sync_ctx.builder_sync_report.add_file_copied(n_bytes);
            apply_metadata(path_src, &path_dst, record_src, false, spec_sync_ctx);
        }
        Err(e) => {
            spec_sync_ctx.record_error(&path_dst, format!("Failed to copy file ({e})"))?;
        }
    }
    Ok(())
}

fn _with_context(c_operation: &str, path: &Path, e: io::Error) -> io::Error {
    io::Error::new(e.kind(), format!("{c_operation}(\"{}\"): {e}", path.display()))
}

/// Stream `path_src` into `path_dst` in fixed-size chunks.
///
/// The destination is created with `n_mode` (or truncated if it exists).
/// Returns the number of bytes written.
pub fn copy_bytes(path_src: &Path, path_dst: &Path, n_mode: u32) -> io::Result<u64> {
    let mut file_src = File::open(path_src).map_err(|e| _with_context("open", path_src, e))?;

    let mut cfg_open = OpenOptions::new();
    cfg_open.read(true).write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        cfg_open.mode(n_mode);
    }
    #[cfg(not(unix))]
    let _ = n_mode;
    let mut file_dst = cfg_open
        .open(path_dst)
        .map_err(|e| _with_context("open", path_dst, e))?;

    let mut buf = [0_u8; N_COPY_CHUNK_BYTES];
    let mut n_bytes: u64 = 0;
    loop {
        let n_read = match file_src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(_with_context("read", path_src, e)),
        };
        file_dst
            .write_all(&buf[..n_read])
            .map_err(|e| _with_context("write", path_dst, e))?;
        n_bytes += n_read as u64;
    }
    Ok(n_bytes)
}

/// True when both files hold exactly the same bytes.
pub fn identical_contents(path_a: &Path, path_b: &Path) -> io::Result<bool> {
    let mut reader_a = BufReader::new(File::open(path_a).map_err(|e| _with_context("open", path_a, e))?);
    let mut reader_b = BufReader::new(File::open(path_b).map_err(|e| _with_context("open", path_b, e))?);

    loop {
        let buf_a = reader_a.fill_buf()?;
        let buf_b = reader_b.fill_buf()?;
        if buf_a.is_empty() || buf_b.is_empty() {
            return Ok(buf_a.is_empty() && buf_b.is_empty());
        }
        let n_common = buf_a.len().min(buf_b.len());
        if buf_a[..n_common] != buf_b[..n_common] {
            return Ok(false);
        }
        reader_a.consume(n_common);
        reader_b.consume(n_common);
    }
}
