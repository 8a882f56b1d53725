// src/filesystem/walk.rs

//! Sorted enumeration of directory trees
//!
//! Delta building, patching and re-archiving all iterate the same trees,
//! and their output must not depend on directory iteration order. Files
//! are returned as relative `/`-separated paths in byte order.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// All regular files under `root`, as sorted relative `/`-separated paths
pub fn relative_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).map_err(|e| {
            Error::IoError(format!("Path {} escapes {}: {}", entry.path().display(), root.display(), e))
        })?;
        files.push(to_slash(relative)?);
    }

    files.sort();
    Ok(files)
}

/// Join a `/`-separated relative path onto `root`
pub fn native_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

fn to_slash(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                Error::IoError(format!("Non UTF-8 path: {}", path.display()))
            })?),
            Component::CurDir => {}
            _ => {
                return Err(Error::IoError(format!(
                    "Unexpected component in relative path {}",
                    path.display()
                )));
            }
        }
    }
    Ok(parts.join("/"))
}
