// src/filesystem/atomic.rs

//! Atomic file promotion
//!
//! A file becomes visible under its final name only once its content is
//! complete. Within one filesystem that is a plain rename; across devices
//! the content is copied and synced before the source is removed.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

/// Move a file, replacing any existing destination
///
/// Falls back to copy + fsync + delete when `src` and `dst` live on
/// different filesystems (EXDEV).
pub fn move_file_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!(
                "Cross-filesystem move detected ({} -> {}), using copy fallback",
                src.display(),
                dst.display()
            );

            // Copy next to the destination first so the final step is still a rename
            let staging = dst.with_extension("moving");
            fs::copy(src, &staging)?;
            File::open(&staging)?.sync_all()?;
            fs::rename(&staging, dst)?;

            if let Some(parent) = dst.parent()
                && let Ok(dir) = File::open(parent)
            {
                // Not all filesystems support fsync on directories
                let _ = dir.sync_all();
            }

            fs::remove_file(src)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(windows)]
fn is_cross_device(e: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    e.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}

/// Write `data` to `path` through a temporary file in the same directory
///
/// Readers observe either the previous content or the complete new one.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::IoError(format!("Failed to create temp file in {}: {}", dir.display(), e)))?;
    temp.write_all(data)
        .map_err(|e| Error::IoError(format!("Failed to write {}: {}", path.display(), e)))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::IoError(format!("Failed to sync {}: {}", path.display(), e)))?;
    temp.persist(path)
        .map_err(|e| Error::IoError(format!("Failed to replace {}: {}", path.display(), e.error)))?;
    Ok(())
}
