// src/archive/mod.rs

//! Package archive extraction and deterministic re-archiving
//!
//! Packages are zip containers. Archives written here are reproducible:
//! entries are sorted by path, every timestamp is the zip epoch
//! (1980-01-01 00:00), and permissions are normalized to `0644` or `0755`
//! depending only on the executable bit. The same directory tree therefore
//! always produces the same bytes, which lets a package rebuilt from
//! deltas pass the checksum of the published full package.

use crate::error::{Error, Result};
use crate::filesystem::{native_path, relative_files};
use crate::progress::{CancelToken, ProgressSink, percent_of};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Mode stored for regular files
pub const FILE_MODE: u32 = 0o644;

/// Mode stored for executables
pub const EXEC_MODE: u32 = 0o755;

/// Extract every entry of `archive` below `dest`
///
/// Entries whose names would escape `dest` (absolute paths, `..`) abort
/// the extraction. Returns the number of files written.
pub fn extract_archive(archive: &Path, dest: &Path, cancel: &CancelToken) -> Result<usize> {
    let file = File::open(archive)
        .map_err(|e| Error::IoError(format!("Failed to open archive {}: {}", archive.display(), e)))?;
    let mut zip = ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::ArchiveError(format!("{}: {}", archive.display(), e)))?;

    fs::create_dir_all(dest)?;
    let mut written = 0;

    for index in 0..zip.len() {
        cancel.check()?;

        let mut entry = zip.by_index(index)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            Error::ArchiveError(format!(
                "Unsafe entry name '{}' in {}",
                entry.name(),
                archive.display()
            ))
        })?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)
            .map_err(|e| Error::IoError(format!("Failed to create {}: {}", target.display(), e)))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| Error::ArchiveError(format!("Failed to extract {}: {}", entry.name(), e)))?;

        if let Some(mode) = entry.unix_mode() {
            set_mode(&target, normalize_mode(mode))?;
        }
        written += 1;
    }

    debug!("Extracted {} files from {}", written, archive.display());
    Ok(written)
}

/// Write every file under `source` into a new archive at `output`
///
/// Empty directories are not recorded. Returns the number of entries.
pub fn create_archive(
    source: &Path,
    output: &Path,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<usize> {
    let files = relative_files(source)?;

    let out = File::create(output)
        .map_err(|e| Error::IoError(format!("Failed to create archive {}: {}", output.display(), e)))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));

    for (index, relative) in files.iter().enumerate() {
        cancel.check()?;

        let path = native_path(source, relative);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(file_mode(&path)?);

        zip.start_file(relative.clone(), options)?;
        let mut input = File::open(&path)
            .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;
        io::copy(&mut input, &mut zip)
            .map_err(|e| Error::ArchiveError(format!("Failed to add {}: {}", relative, e)))?;

        progress.report(percent_of(index as u64 + 1, files.len() as u64));
    }

    let writer = zip.finish()?;
    writer
        .into_inner()
        .map_err(|e| Error::IoError(format!("Failed to flush {}: {}", output.display(), e.error())))?
        .sync_all()?;

    progress.report(100);
    debug!("Wrote {} entries to {}", files.len(), output.display());
    Ok(files.len())
}

fn normalize_mode(mode: u32) -> u32 {
    if mode & 0o111 != 0 { EXEC_MODE } else { FILE_MODE }
}

/// Normalized mode of a file on disk
#[cfg(unix)]
pub fn file_mode(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)
        .map_err(|e| Error::IoError(format!("Failed to stat {}: {}", path.display(), e)))?
        .permissions()
        .mode();
    Ok(normalize_mode(mode))
}

#[cfg(not(unix))]
pub fn file_mode(_path: &Path) -> Result<u32> {
    Ok(FILE_MODE)
}

/// Apply a normalized mode to a file on disk
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(normalize_mode(mode)))
        .map_err(|e| Error::IoError(format!("Failed to chmod {}: {}", path.display(), e)))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
