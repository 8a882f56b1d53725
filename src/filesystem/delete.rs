// src/filesystem/delete.rs

//! Deletion that survives transient locks
//!
//! Files in an application directory are routinely held open for a moment
//! by scanners and indexers. Deletion is retried briefly, and directories
//! can first be renamed aside to `<name>.old` so a half-deleted tree never
//! keeps its live name.

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Retry policy for deletions: 4 retries, 50 ms apart
pub const DELETE_RETRY: RetryPolicy = RetryPolicy::new(4, 50);

/// Suffix for directories renamed aside before deletion
pub const OLD_SUFFIX: &str = ".old";

/// Delete a file or directory tree, retrying transient failures
///
/// A missing path is not an error. When `rename_first` is set, a directory
/// is moved to `<path>.old` before its contents are removed.
pub fn delete_hard(path: &Path, rename_first: bool) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(Error::IoError(format!(
                "Failed to stat {}: {}",
                path.display(),
                e
            )));
        }
    };

    if !metadata.is_dir() {
        return DELETE_RETRY.run("Delete file", || remove_file(path));
    }

    let target = if rename_first {
        let aside = old_path(path);
        if aside.exists() {
            DELETE_RETRY.run("Delete stale directory", || remove_dir(&aside))?;
        }
        DELETE_RETRY.run("Rename directory aside", || {
            fs::rename(path, &aside).map_err(|e| {
                Error::IoError(format!("Failed to rename {}: {}", path.display(), e))
            })
        })?;
        debug!("Renamed {} to {}", path.display(), aside.display());
        aside
    } else {
        path.to_path_buf()
    };

    DELETE_RETRY.run("Delete directory", || remove_dir(&target))
}

/// `<path>.old`
pub fn old_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(OLD_SUFFIX);
    PathBuf::from(name)
}

fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            clear_readonly(path);
            Err(Error::IoError(format!("Failed to delete {}: {}", path.display(), e)))
        }
    }
}

fn remove_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::IoError(format!(
            "Failed to delete directory {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Read-only files cannot be deleted on Windows; clear the flag for the retry
fn clear_readonly(path: &Path) {
    if let Ok(metadata) = fs::metadata(path) {
        let mut permissions = metadata.permissions();
        if permissions.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            let _ = fs::set_permissions(path, permissions);
        }
    }
}
