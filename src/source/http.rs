// src/source/http.rs

//! Update source served over HTTP(S)
//!
//! Any static file server works: the base URL points at the directory that
//! holds `releases.{channel}.json` and the artifacts. Downloads are streamed
//! to disk in chunks, never buffered in memory.

use super::{UpdateSource, copy_stream, feed_file_name};
use crate::asset::{Asset, AssetFeed};
use crate::error::{Error, Result};
use crate::progress::{CancelToken, ProgressSink};
use reqwest::blocking::{Client, Response};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Timeout for establishing connections and fetching feeds (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Update source backed by a static HTTP server
pub struct HttpSource {
    base: Url,
    client: Client,
}

impl HttpSource {
    /// Create a source rooted at `base_url`
    ///
    /// A trailing slash is added if missing so relative joins stay inside
    /// the base directory.
    pub fn new(base_url: &str) -> Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base = Url::parse(&normalized)
            .map_err(|e| Error::ConfigError(format!("Invalid update URL {}: {}", base_url, e)))?;

        // Artifact downloads can be large, so only the connect phase is bounded
        let client = Client::builder()
            .connect_timeout(HTTP_TIMEOUT)
            .timeout(None::<Duration>)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url_for(&self, file_name: &str) -> Result<Url> {
        self.base
            .join(file_name)
            .map_err(|e| Error::DownloadError(format!("Invalid file name {}: {}", file_name, e)))
    }
}

fn ensure_success(response: Response, url: &Url) -> std::result::Result<Response, String> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(format!("HTTP {} from {}", response.status(), url))
    }
}

impl UpdateSource for HttpSource {
    fn get_release_feed(&self, channel: &str) -> Result<AssetFeed> {
        let url = self.url_for(&feed_file_name(channel))?;
        info!("Fetching release feed from {}", url);

        let response = self
            .client
            .get(url.clone())
            .timeout(HTTP_TIMEOUT)
            .send()
            .map_err(|e| Error::FeedUnavailable(format!("Failed to fetch {}: {}", url, e)))?;
        let response = ensure_success(response, &url).map_err(Error::FeedUnavailable)?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::FeedUnavailable(format!("Failed to read {}: {}", url, e)))?;

        AssetFeed::from_json(channel, &bytes)
    }

    fn download_asset(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        let url = self.url_for(&asset.file_name)?;
        debug!("Downloading {} to {}", url, dest.display());

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to download {}: {}", url, e)))?;
        let mut response = ensure_success(response, &url).map_err(Error::DownloadError)?;
        let total = response.content_length().unwrap_or(asset.size);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(dest)
            .map_err(|e| Error::IoError(format!("Failed to create {}: {}", dest.display(), e)))?;
        let mut writer = BufWriter::new(file);

        let downloaded = copy_stream(&mut response, &mut writer, total, progress, cancel)?;
        debug!("Downloaded {} bytes from {}", downloaded, url);
        Ok(())
    }
}
