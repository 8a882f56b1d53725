// src/filesystem/compare.rs

//! Content equality for large files
//!
//! Sizes are compared first. Equal-size files are memory-mapped and
//! compared in fixed chunks, so a difference near the start returns early
//! and nothing is copied into the heap.

use crate::error::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Comparison chunk size (10 MB)
const CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Whether two files have byte-identical content
pub fn files_equal(a: &Path, b: &Path) -> Result<bool> {
    let len_a = std::fs::metadata(a)
        .map_err(|e| Error::IoError(format!("Failed to stat {}: {}", a.display(), e)))?
        .len();
    let len_b = std::fs::metadata(b)
        .map_err(|e| Error::IoError(format!("Failed to stat {}: {}", b.display(), e)))?
        .len();

    if len_a != len_b {
        return Ok(false);
    }
    if len_a == 0 {
        // Zero-length files cannot be mapped on every platform
        return Ok(true);
    }

    let map_a = map(a)?;
    let map_b = map(b)?;

    Ok(map_a
        .chunks(CHUNK_SIZE)
        .zip(map_b.chunks(CHUNK_SIZE))
        .all(|(x, y)| x == y))
}

fn map(path: &Path) -> Result<Mmap> {
    let file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;
    // SAFETY: the mapping is read-only and dropped before this call returns
    // to the caller; package payloads are not modified while being diffed.
    unsafe { Mmap::map(&file) }
        .map_err(|e| Error::IoError(format!("Failed to map {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_equal_and_different() {
        let temp = TempDir::new().unwrap();
        let a = write(&temp, "a", b"same bytes");
        let b = write(&temp, "b", b"same bytes");
        let c = write(&temp, "c", b"same bytez");
        let d = write(&temp, "d", b"longer content");

        assert!(files_equal(&a, &b).unwrap());
        assert!(!files_equal(&a, &c).unwrap());
        assert!(!files_equal(&a, &d).unwrap());
    }

    #[test]
    fn test_empty_files_equal() {
        let temp = TempDir::new().unwrap();
        let a = write(&temp, "a", b"");
        let b = write(&temp, "b", b"");
        assert!(files_equal(&a, &b).unwrap());
    }

    #[test]
    fn test_difference_past_first_chunk() {
        let temp = TempDir::new().unwrap();
        let mut data = vec![0u8; CHUNK_SIZE + 17];
        let a = write(&temp, "a", &data);
        *data.last_mut().unwrap() = 1;
        let b = write(&temp, "b", &data);

        assert!(!files_equal(&a, &b).unwrap());
    }

    #[test]
    fn test_missing_file_errors() {
        let temp = TempDir::new().unwrap();
        let a = write(&temp, "a", b"x");
        assert!(files_equal(&a, &temp.path().join("missing")).is_err());
    }
}
