// src/delta/format.rs

//! Patch formats and delta archive entry naming
//!
//! Inside a delta package every payload file of the new release appears
//! in one of four forms:
//!
//! | Entry                      | Meaning                                    |
//! |----------------------------|--------------------------------------------|
//! | `path.bsdiff`              | legacy patch against the base file         |
//! | `path.zsdiff`              | modern (zstd) patch against the base file  |
//! | `path.diff` (empty)        | file unchanged from the base               |
//! | `path`                     | new file, stored verbatim                  |
//!
//! Patched and unchanged files also carry `path.shasum`, a one-line
//! `SHA1 FILENAME SIZE` record of the expected output. It is empty for
//! unchanged files.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Extension of the zero-length "unchanged" marker
pub const SAME_EXT: &str = "diff";

/// Extension of the per-file checksum sidecar
pub const SHASUM_EXT: &str = "shasum";

/// zstd's default maximum window (128 MB); larger inputs need an explicit window
#[cfg(feature = "zstd-patch")]
const DEFAULT_WINDOW_LOG: u32 = 27;

#[cfg(all(feature = "zstd-patch", target_pointer_width = "64"))]
const MAX_WINDOW_LOG: u32 = 31;

#[cfg(all(feature = "zstd-patch", not(target_pointer_width = "64")))]
const MAX_WINDOW_LOG: u32 = 30;

/// Binary patch encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchFormat {
    /// bsdiff, always available
    Legacy,
    /// zstd with the base file as a prefix dictionary
    #[default]
    Modern,
}

impl PatchFormat {
    /// File extension used for patches of this format
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Legacy => "bsdiff",
            Self::Modern => "zsdiff",
        }
    }

    /// Whether this build can encode and decode the format
    pub const fn is_available(&self) -> bool {
        match self {
            Self::Legacy => true,
            Self::Modern => cfg!(feature = "zstd-patch"),
        }
    }

    /// The format a build will actually use
    ///
    /// Decided once per build so a delta package never mixes formats.
    pub fn resolve(preferred: PatchFormat) -> PatchFormat {
        if preferred.is_available() {
            preferred
        } else {
            warn!(
                "Patch format '{}' is not available in this build, using '{}' for the whole delta",
                preferred,
                PatchFormat::Legacy
            );
            PatchFormat::Legacy
        }
    }

    /// Create a patch that turns `old` into `new`
    pub fn encode(&self, old: &[u8], new: &[u8], level: i32) -> Result<Vec<u8>> {
        match self {
            Self::Legacy => {
                let mut patch = Vec::new();
                bsdiff::diff(old, new, &mut patch)
                    .map_err(|e| Error::DeltaError(format!("bsdiff failed: {}", e)))?;
                Ok(patch)
            }
            Self::Modern => encode_modern(old, new, level),
        }
    }

    /// Reconstruct the new content from `old` and a patch
    pub fn decode(&self, old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Legacy => decode_legacy(old, patch),
            Self::Modern => decode_modern(old, patch),
        }
    }
}

impl fmt::Display for PatchFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Modern => f.write_str("modern"),
        }
    }
}

fn decode_legacy(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    // The bsdiff decoder indexes with lengths read from the patch; a
    // malformed patch must surface as an error, not abort the update.
    let result = std::panic::catch_unwind(|| {
        let mut reader = patch;
        let mut new = Vec::new();
        bsdiff::patch(old, &mut reader, &mut new).map(|()| new)
    });

    match result {
        Ok(Ok(new)) => Ok(new),
        Ok(Err(e)) => Err(Error::PatchCorrupt(format!("bsdiff patch: {}", e))),
        Err(_) => Err(Error::PatchCorrupt("bsdiff patch is malformed".to_string())),
    }
}

#[cfg(feature = "zstd-patch")]
fn encode_modern(old: &[u8], new: &[u8], level: i32) -> Result<Vec<u8>> {
    use std::io::Write;

    let mut encoder = zstd::Encoder::with_dictionary(Vec::new(), level, old)
        .map_err(|e| Error::DeltaError(format!("Failed to create encoder: {}", e)))?;

    let window_log = window_log_for(old.len().max(new.len()));
    if window_log > DEFAULT_WINDOW_LOG {
        encoder
            .window_log(window_log)
            .and_then(|()| encoder.long_distance_matching(true))
            .map_err(|e| Error::DeltaError(format!("Failed to configure encoder: {}", e)))?;
    }
    encoder
        .include_checksum(true)
        .map_err(|e| Error::DeltaError(format!("Failed to configure encoder: {}", e)))?;

    encoder
        .write_all(new)
        .map_err(|e| Error::DeltaError(format!("Failed to write data: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::DeltaError(format!("Failed to finish compression: {}", e)))
}

#[cfg(feature = "zstd-patch")]
fn decode_modern(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;

    let mut decoder = zstd::Decoder::with_dictionary(patch, old)
        .map_err(|e| Error::PatchCorrupt(format!("Failed to create decoder: {}", e)))?;

    // Large outputs are encoded with a window above the decoder's default limit
    decoder
        .window_log_max(MAX_WINDOW_LOG)
        .map_err(|e| Error::PatchCorrupt(format!("Failed to configure decoder: {}", e)))?;

    let mut new = Vec::new();
    decoder
        .read_to_end(&mut new)
        .map_err(|e| Error::PatchCorrupt(format!("zstd patch: {}", e)))?;
    Ok(new)
}

/// Smallest window log that covers `len` bytes, clamped to zstd's limits
#[cfg(feature = "zstd-patch")]
fn window_log_for(len: usize) -> u32 {
    let bits = usize::BITS - len.leading_zeros();
    bits.saturating_add(1).clamp(10, MAX_WINDOW_LOG)
}

#[cfg(not(feature = "zstd-patch"))]
fn encode_modern(_old: &[u8], _new: &[u8], _level: i32) -> Result<Vec<u8>> {
    Err(Error::DeltaError(
        "modern patch format is not available in this build".to_string(),
    ))
}

#[cfg(not(feature = "zstd-patch"))]
fn decode_modern(_old: &[u8], _patch: &[u8]) -> Result<Vec<u8>> {
    Err(Error::PatchCorrupt(
        "modern patch format is not available in this build".to_string(),
    ))
}

/// How a delta payload entry should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind<'a> {
    /// Checksum sidecar, consumed alongside its patch
    Sidecar,
    /// `.diff` marker for the given target path
    Unchanged(&'a str),
    /// Patch for the given target path
    Patch(&'a str, PatchFormat),
    /// New file stored verbatim
    Verbatim,
}

/// Classify a relative path found in a delta payload
pub fn classify_entry(relative: &str) -> EntryKind<'_> {
    let Some((target, ext)) = relative.rsplit_once('.') else {
        return EntryKind::Verbatim;
    };
    if target.is_empty() || target.ends_with('/') {
        return EntryKind::Verbatim;
    }

    match ext {
        SHASUM_EXT => EntryKind::Sidecar,
        SAME_EXT => EntryKind::Unchanged(target),
        e if e == PatchFormat::Legacy.extension() => EntryKind::Patch(target, PatchFormat::Legacy),
        e if e == PatchFormat::Modern.extension() => EntryKind::Patch(target, PatchFormat::Modern),
        _ => EntryKind::Verbatim,
    }
}

/// Expected output of a patched file, as stored in its `.shasum` sidecar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shasum {
    pub sha1: String,
    pub file_name: String,
    pub size: u64,
}

impl Shasum {
    pub fn new(sha1: impl Into<String>, file_name: impl Into<String>, size: u64) -> Self {
        Self {
            sha1: sha1.into(),
            file_name: file_name.into(),
            size,
        }
    }

    /// Parse a `SHA1 FILENAME SIZE` line; `None` for an empty sidecar
    pub fn parse(content: &str) -> Result<Option<Self>> {
        let line = content.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(Error::PatchCorrupt(format!("malformed shasum record '{}'", line)));
        }

        let size = parts[parts.len() - 1]
            .parse::<u64>()
            .map_err(|_| Error::PatchCorrupt(format!("malformed size in shasum record '{}'", line)))?;

        Ok(Some(Self {
            sha1: parts[0].to_string(),
            file_name: parts[1..parts.len() - 1].join(" "),
            size,
        }))
    }

    /// Check reconstructed content against this record
    pub fn verify(&self, content: &[u8]) -> Result<()> {
        if content.len() as u64 != self.size {
            return Err(Error::PatchCorrupt(format!(
                "{}: expected {} bytes, patch produced {}",
                self.file_name,
                self.size,
                content.len()
            )));
        }
        let actual = crate::hash::sha1(content);
        if !actual.eq_ignore_ascii_case(&self.sha1) {
            return Err(Error::PatchCorrupt(format!(
                "{}: expected SHA1 {}, patch produced {}",
                self.file_name, self.sha1, actual
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Shasum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.sha1, self.file_name, self.size)
    }
}
