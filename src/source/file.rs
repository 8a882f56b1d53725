// src/source/file.rs

//! Update source backed by a directory
//!
//! Useful for network shares, removable media and tests. The directory
//! holds `releases.{channel}.json` and the artifacts it lists.

use super::{UpdateSource, copy_stream, feed_file_name};
use crate::asset::{Asset, AssetFeed};
use crate::error::{Error, Result};
use crate::progress::{CancelToken, ProgressSink};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Update source reading from a local directory
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a remote key below the root
    ///
    /// Keys may name subdirectories but never leave the root.
    fn path_of(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let plain = relative.components().count() > 0
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(Error::DownloadError(format!(
                "Refusing asset key '{}' outside {}",
                key,
                self.root.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl UpdateSource for FileSource {
    fn get_release_feed(&self, channel: &str) -> Result<AssetFeed> {
        let path = self.root.join(feed_file_name(channel));
        info!("Reading release feed {}", path.display());

        let bytes = fs::read(&path).map_err(|e| {
            Error::FeedUnavailable(format!("Failed to read {}: {}", path.display(), e))
        })?;
        AssetFeed::from_json(channel, &bytes)
    }

    fn download_asset(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        let source = self.path_of(&asset.file_name)?;
        debug!("Copying {} to {}", source.display(), dest.display());

        let mut input = File::open(&source).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                Error::DownloadError(format!("{} not found in {}", asset.file_name, self.root.display()))
            }
            _ => Error::IoError(format!("Failed to open {}: {}", source.display(), e)),
        })?;
        let total = input.metadata().map(|m| m.len()).unwrap_or(asset.size);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let out = File::create(dest)
            .map_err(|e| Error::IoError(format!("Failed to create {}: {}", dest.display(), e)))?;
        let mut writer = BufWriter::new(out);

        copy_stream(&mut input, &mut writer, total, progress, cancel)?;
        Ok(())
    }
}
