// src/config.rs

//! Update engine configuration
//!
//! Every field has a default, so an empty TOML document (or no document at
//! all) yields a working configuration:
//!
//! ```toml
//! max_parallelism = 4
//! max_delta_count = 10
//! patch_format = "modern"
//!
//! [retry]
//! retries = 4
//! delay_ms = 250
//! backoff = "fixed"
//! ```

use crate::asset::DEFAULT_ARCHIVE_EXT;
use crate::delta::PatchFormat;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound on the default worker count
pub const MAX_DEFAULT_WORKERS: usize = 8;

/// Default cap on delta chain length before a full download is preferred
pub const DEFAULT_MAX_DELTA_COUNT: usize = 10;

/// Default zstd level for modern patches
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Default directory inside package archives holding the application files
pub const DEFAULT_PAYLOAD_ROOT: &str = "lib";

/// Tunables for delta building and the update pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Worker pool width; `None` picks `min(cpus - 1, 8)`, at least 1
    pub max_parallelism: Option<usize>,
    pub retry: RetryPolicy,
    /// Longest delta chain worth applying
    pub max_delta_count: usize,
    /// Deltas are skipped when their summed size exceeds `target.size * ratio`
    pub max_delta_size_ratio: f64,
    /// Preferred patch format for delta builds
    pub patch_format: PatchFormat,
    pub zstd_level: i32,
    pub archive_extension: String,
    pub payload_root: String,
    /// Check archives rebuilt from deltas against the target checksum
    pub verify_reconstructed: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            max_parallelism: None,
            retry: RetryPolicy::default(),
            max_delta_count: DEFAULT_MAX_DELTA_COUNT,
            max_delta_size_ratio: 1.0,
            patch_format: PatchFormat::default(),
            zstd_level: DEFAULT_ZSTD_LEVEL,
            archive_extension: DEFAULT_ARCHIVE_EXT.to_string(),
            payload_root: DEFAULT_PAYLOAD_ROOT.to_string(),
            verify_reconstructed: true,
        }
    }
}

impl UpdateConfig {
    /// Parse configuration from a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::ConfigError(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallelism == Some(0) {
            return Err(Error::ConfigError(
                "max_parallelism must be at least 1".to_string(),
            ));
        }
        if self.max_delta_size_ratio.is_nan() || self.max_delta_size_ratio <= 0.0 {
            return Err(Error::ConfigError(
                "max_delta_size_ratio must be positive".to_string(),
            ));
        }
        if self.archive_extension.trim_start_matches('.').is_empty() {
            return Err(Error::ConfigError(
                "archive_extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective worker count for parallel downloads, diffing and patching
    pub fn worker_count(&self) -> usize {
        match self.max_parallelism {
            Some(n) => n.max(1),
            None => default_worker_count(),
        }
    }

    /// Archive extension without the leading dot
    pub fn extension(&self) -> &str {
        self.archive_extension.trim_start_matches('.')
    }
}

/// `min(available_parallelism - 1, 8)`, never less than 1
pub fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).clamp(1, MAX_DEFAULT_WORKERS)
}

/// Caller-facing switches for one update manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateOptions {
    /// Accept a feed whose latest release is older than the installed one
    pub allow_downgrade: bool,
    /// Follow this channel instead of the one the app was installed from
    pub explicit_channel: Option<String>,
}
