//! Write-temporary-then-rename helpers.
//!
//! Every shared file (registry records, `my.cnf`, credential files, unit
//! files, backup manifests) goes through [`atomic_write`] so concurrent
//! readers only ever see the old or the new content.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace `path` with `contents`.
///
/// The temporary file lives in the target directory so the final rename
/// never crosses filesystems. When `mode` is `None` and the target already
/// exists, its permission bits are carried over.
pub fn atomic_write(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mode = match mode {
        Some(mode) => Some(mode),
        None => fs::metadata(path)
            .ok()
            .map(|m| m.permissions().mode() & 0o7777),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::Persistence(format!("Failed to create temp file in {}: {}", dir.display(), e)))?;
    if let Some(mode) = mode {
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))?;
    }

    tmp.write_all(contents)
        .map_err(|e| Error::Persistence(format!("Failed to write temp file: {}", e)))?;
    tmp.flush()?;

    // Ensure data is written to disk before rename
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::Persistence(format!("Failed to sync temp file: {}", e)))?;

    tmp.persist(path).map_err(|e| {
        Error::Persistence(format!("Failed to replace {}: {}", path.display(), e.error))
    })?;

    fsync_dir(dir)
}

/// Flush a file written by another process before it is published.
pub fn fsync_file(path: &Path) -> Result<()> {
    fs::File::open(path)?.sync_all()?;
    Ok(())
}

/// Flush a directory entry so a completed rename survives a crash.
pub fn fsync_dir(dir: &Path) -> Result<()> {
    let handle = fs::File::open(dir)?;
    handle.sync_all()?;
    Ok(())
}
