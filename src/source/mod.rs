// src/source/mod.rs

//! Where release feeds and package artifacts come from
//!
//! The update engine only needs two things from a source: the feed for a
//! channel and the bytes of an asset. Transports implement
//! [`UpdateSource`]:
//!
//! - **FileSource**: a local or mounted directory
//! - **HttpSource**: a static HTTP(S) server
//!
//! Both expect the same layout: `releases.{channel}.json` next to the
//! artifacts it lists.

mod file;
mod http;

pub use file::FileSource;
pub use http::HttpSource;

use crate::asset::{Asset, AssetFeed};
use crate::error::{Error, Result};
use crate::progress::{CancelToken, ProgressSink, percent_of};
use std::io::{Read, Write};
use std::path::Path;

/// Buffer size for streaming copies (64 KB)
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Supplier of release feeds and artifacts
pub trait UpdateSource: Send + Sync {
    /// Retrieve and parse the feed for `channel`
    ///
    /// # Errors
    /// `FeedUnavailable` when the feed cannot be fetched, `MalformedFeed`
    /// when it cannot be parsed.
    fn get_release_feed(&self, channel: &str) -> Result<AssetFeed>;

    /// Write the bytes of `asset` to `dest`, reporting 0..=100
    ///
    /// Cancellation is checked between chunks. The caller verifies the
    /// checksum; sources only move bytes.
    fn download_asset(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// File name of the feed document for a channel
pub fn feed_file_name(channel: &str) -> String {
    format!("releases.{}.json", channel)
}

/// Stream `reader` into `writer` in chunks
///
/// `total` sizes the progress percentage; when it is zero, progress jumps
/// to 100 at the end. Returns the number of bytes copied.
pub(crate) fn copy_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<u64> {
    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
    let mut copied: u64 = 0;

    loop {
        cancel.check()?;

        let n = reader
            .read(&mut buffer)
            .map_err(|e| Error::DownloadError(format!("Failed to read data: {}", e)))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buffer[..n])
            .map_err(|e| Error::IoError(format!("Failed to write data: {}", e)))?;

        copied += n as u64;
        if total > 0 {
            progress.report(percent_of(copied, total));
        }
    }

    writer
        .flush()
        .map_err(|e| Error::IoError(format!("Failed to flush data: {}", e)))?;
    progress.report(100);
    Ok(copied)
}
