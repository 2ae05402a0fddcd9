//! Per-directory listing with `lstat`-style records.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::Path;

use crate::spec::{EnumSyncEntryKind, SignalAbort};
use crate::sync::SpecSyncContext;

/// Status of one directory entry, captured without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecFileRecord {
    pub kind: EnumSyncEntryKind,
    pub n_size: u64,
    /// Permission bits including setuid/setgid/sticky.
    pub n_mode: u32,
    pub n_uid: u32,
    pub n_gid: u32,
    /// Access time, whole seconds since the epoch.
    pub n_atime: i64,
    /// Modification time, whole seconds since the epoch.
    pub n_mtime: i64,
    pub n_dev: u64,
    pub n_ino: u64,
}

impl SpecFileRecord {
    /// `lstat` the given path.
    pub fn stat(path: &Path) -> io::Result<Self> {
        fs::symlink_metadata(path).map(|meta| Self::from_metadata(&meta))
    }

    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        let cfg_file_type = meta.file_type();
        let kind = if cfg_file_type.is_symlink() {
            EnumSyncEntryKind::Symlink
        } else if cfg_file_type.is_dir() {
            EnumSyncEntryKind::Directory
        } else if cfg_file_type.is_file() {
            EnumSyncEntryKind::File
        } else {
            EnumSyncEntryKind::Other
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                kind,
                n_size: meta.size(),
                n_mode: meta.mode() & 0o7777,
                n_uid: meta.uid(),
                n_gid: meta.gid(),
                n_atime: meta.atime(),
                n_mtime: meta.mtime(),
                n_dev: meta.dev(),
                n_ino: meta.ino(),
            }
        }
        #[cfg(not(unix))]
        {
            use std::time::UNIX_EPOCH;
            let to_secs = |t: io::Result<std::time::SystemTime>| {
                t.ok()
                    .and_then(|v| v.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs() as i64)
            };
            Self {
                kind,
                n_size: meta.len(),
                n_mode: if meta.permissions().readonly() { 0o444 } else { 0o644 },
                n_uid: 0,
                n_gid: 0,
                n_atime: to_secs(meta.accessed()),
                n_mtime: to_secs(meta.modified()),
                n_dev: 0,
                n_ino: 0,
            }
        }
    }

    /// `(device, inode)` pair identifying the object on this host.
    pub fn identity(&self) -> (u64, u64) {
        (self.n_dev, self.n_ino)
    }
}

/// Name-keyed view of one directory's immediate children.
///
/// Iteration is in byte order of the names. `.` and `..` are never present.
#[derive(Debug, Clone, Default)]
pub struct SpecDirSnapshot {
    map_entries: BTreeMap<OsString, SpecFileRecord>,
}

impl SpecDirSnapshot {
    pub fn len(&self) -> usize {
        self.map_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map_entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &SpecFileRecord)> {
        self.map_entries.iter().map(|(k, v)| (k.as_os_str(), v))
    }

    pub(crate) fn insert(&mut self, name: OsString, record: SpecFileRecord) {
        self.map_entries.insert(name, record);
    }

    /// Look up `name`, optionally ignoring ASCII case.
    ///
    /// Returns the name as stored in this snapshot, which differs from `name`
    /// only in case when `if_ignore_case` is set.
    pub fn find(&self, name: &OsStr, if_ignore_case: bool) -> Option<(&OsStr, &SpecFileRecord)> {
        if let Some((k, v)) = self.map_entries.get_key_value(name) {
            return Some((k.as_os_str(), v));
        }
        if !if_ignore_case {
            return None;
        }
        self.map_entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(k, v)| (k.as_os_str(), v))
    }
}

fn _is_dot_entry(name: &OsStr) -> bool {
    name.as_encoded_bytes().first() == Some(&b'.')
}

/// Read the immediate children of `path_dir` into a snapshot.
///
/// Returns `Ok(None)` when the directory itself cannot be enumerated; the
/// failure is recorded on the context. With `if_tolerate_missing`, a directory
/// that does not exist yields an empty snapshot without an error. Children that
/// cannot be stat'ed are recorded and left out.
pub(crate) fn list_directory(
    path_dir: &Path,
    if_tolerate_missing: bool,
    spec_sync_ctx: &mut SpecSyncContext,
) -> Result<Option<SpecDirSnapshot>, SignalAbort> {
    let iter_entries = match fs::read_dir(path_dir) {
        Ok(iter) => iter,
        Err(e) if if_tolerate_missing && e.kind() == io::ErrorKind::NotFound => {
            return Ok(Some(SpecDirSnapshot::default()));
        }
        Err(e) => {
            spec_sync_ctx.record_error(
                path_dir,
                format!("Failed to read directory {} ({e})", path_dir.display()),
            )?;
            return Ok(None);
        }
    };

    let if_include_dot_entries = spec_sync_ctx.spec_sync_options.if_include_dot_entries;
    let mut spec_snapshot = SpecDirSnapshot::default();
    for _entry_res in iter_entries {
        let entry = match _entry_res {
            Ok(v) => v,
            Err(e) => {
                spec_sync_ctx.record_error(
                    path_dir,
                    format!(
                        "Failed to read directory entry under {} ({e})",
                        path_dir.display()
                    ),
                )?;
                continue;
            }
        };

        let name = entry.file_name();
        if name == "." || name == ".." || (!if_include_dot_entries && _is_dot_entry(&name)) {
            continue;
        }

        let path_entry = entry.path();
        match SpecFileRecord::stat(&path_entry) {
            Ok(record) => spec_snapshot.insert(name, record),
            Err(e) => spec_sync_ctx.record_error(
                &path_entry,
                format!("Failed to stat {} ({e})", path_entry.display()),
            )?,
        }
    }
    Ok(Some(spec_snapshot))
}
