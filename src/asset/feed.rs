// src/asset/feed.rs

//! Release feed document
//!
//! A feed is a UTF-8 JSON object holding the assets published for one
//! channel. Both the camelCase schema and the PascalCase schema written by
//! older publishers are accepted:
//!
//! ```json
//! { "assets": [ { "packageId": "MyApp", "version": "1.2.0",
//!                 "type": "FullPackage", "fileName": "MyApp-1.2.0.nupkg",
//!                 "sha1": "…", "sha256": "…", "size": 1024 } ] }
//! ```
//!
//! Unknown fields are ignored. A missing required field, an unparseable
//! version, a package id that is not a plain name or a digest that is not
//! well-formed hex rejects the whole document.

use super::{Asset, AssetKind};
use crate::error::{Error, Result};
use crate::hash::{Hash, HashAlgorithm};
use crate::version;
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct FeedDocument {
    #[serde(alias = "Assets")]
    assets: Vec<AssetRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetRecord {
    #[serde(alias = "PackageId")]
    package_id: String,
    #[serde(alias = "Version")]
    version: String,
    #[serde(rename = "type", alias = "Type")]
    kind: String,
    #[serde(alias = "FileName")]
    file_name: String,
    #[serde(alias = "SHA1", alias = "Sha1")]
    sha1: String,
    #[serde(default, alias = "SHA256", alias = "Sha256", skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    #[serde(alias = "Size")]
    size: u64,
    #[serde(default, alias = "NotesMarkdown", skip_serializing_if = "Option::is_none")]
    notes_markdown: Option<String>,
    #[serde(
        default,
        alias = "NotesHtml",
        alias = "NotesHTML",
        skip_serializing_if = "Option::is_none"
    )]
    notes_html: Option<String>,
}

impl AssetRecord {
    fn into_asset(self) -> Result<Asset> {
        let version = version::parse_version(&self.version).map_err(|e| {
            Error::MalformedFeed(format!("asset '{}': {}", self.file_name, e))
        })?;
        let kind: AssetKind = self.kind.parse()?;
        check_package_id(&self.package_id)?;

        let sha256 = self.sha256.filter(|s| !s.trim().is_empty());
        if let Some(sha256) = &sha256 {
            check_digest(&self.file_name, HashAlgorithm::Sha256, sha256)?;
        }
        // SHA-1 may only be left empty when SHA-256 is published
        if sha256.is_none() || !self.sha1.trim().is_empty() {
            check_digest(&self.file_name, HashAlgorithm::Sha1, &self.sha1)?;
        }

        Ok(Asset {
            package_id: self.package_id,
            version,
            kind,
            file_name: self.file_name,
            sha1: self.sha1.trim().to_string(),
            sha256: sha256.map(|s| s.trim().to_string()),
            size: self.size,
            notes_markdown: self.notes_markdown,
            notes_html: self.notes_html,
        })
    }

    fn from_asset(asset: &Asset) -> Self {
        Self {
            package_id: asset.package_id.clone(),
            version: asset.version.to_string(),
            kind: asset.kind.as_str().to_string(),
            file_name: asset.file_name.clone(),
            sha1: asset.sha1.clone(),
            sha256: asset.sha256.clone(),
            size: asset.size,
            notes_markdown: asset.notes_markdown.clone(),
            notes_html: asset.notes_html.clone(),
        }
    }
}

/// Package ids become part of local file names, so they must be a single
/// plain path component.
fn check_package_id(package_id: &str) -> Result<()> {
    let unsafe_id = package_id.is_empty()
        || package_id.contains(['/', '\\', ':', '\0'])
        || package_id.contains("..")
        || package_id.starts_with('.');
    if unsafe_id {
        return Err(Error::MalformedFeed(format!(
            "invalid package id '{}'",
            package_id.escape_debug()
        )));
    }
    Ok(())
}

fn check_digest(file_name: &str, algorithm: HashAlgorithm, value: &str) -> Result<()> {
    Hash::new(algorithm, value.trim())
        .map(drop)
        .map_err(|e| Error::MalformedFeed(format!("asset '{}': {} {}", file_name, algorithm, e)))
}

/// The assets published for one release channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetFeed {
    pub channel: String,
    pub assets: Vec<Asset>,
}

impl AssetFeed {
    pub fn new(channel: impl Into<String>, assets: Vec<Asset>) -> Self {
        Self {
            channel: channel.into(),
            assets,
        }
    }

    /// Parse a feed document fetched for `channel`
    ///
    /// Assets of a type this library does not know are skipped with a
    /// warning so newer publishers can add artifact kinds.
    pub fn from_json(channel: &str, bytes: &[u8]) -> Result<Self> {
        let document: FeedDocument = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedFeed(format!("channel '{}': {}", channel, e)))?;

        let mut assets = Vec::with_capacity(document.assets.len());
        for record in document.assets {
            if record.kind.parse::<AssetKind>().is_err() {
                warn!(
                    "Skipping asset {} with unknown type '{}'",
                    record.file_name, record.kind
                );
                continue;
            }
            assets.push(record.into_asset()?);
        }

        debug!("Parsed feed for channel '{}': {} assets", channel, assets.len());
        Ok(Self::new(channel, assets))
    }

    /// Serialize to the camelCase document format
    pub fn to_json(&self) -> Result<String> {
        let document = FeedDocument {
            assets: self.assets.iter().map(AssetRecord::from_asset).collect(),
        };
        serde_json::to_string_pretty(&document)
            .map_err(|e| Error::IoError(format!("Failed to serialize feed: {}", e)))
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Look up an asset by file name (case-insensitive)
    pub fn find(&self, file_name: &str) -> Option<&Asset> {
        self.assets
            .iter()
            .find(|a| a.file_name.eq_ignore_ascii_case(file_name))
    }

    /// Full packages, in feed order
    pub fn full_packages(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter().filter(|a| a.is_full())
    }

    /// The full package with the greatest version
    pub fn latest_full(&self) -> Option<&Asset> {
        self.full_packages()
            .max_by(|a, b| version::cmp_precedence(&a.version, &b.version))
    }

    /// Delta packages with `from < version <= to`, strictly ascending by version
    pub fn deltas_between(&self, package_id: &str, from: &Version, to: &Version) -> Vec<Asset> {
        let mut deltas: Vec<Asset> = self
            .assets
            .iter()
            .filter(|a| a.is_delta() && a.package_id.eq_ignore_ascii_case(package_id))
            .filter(|a| version::is_newer(&a.version, from) && !version::is_newer(&a.version, to))
            .cloned()
            .collect();
        deltas.sort_by(|a, b| version::cmp_precedence(&a.version, &b.version));
        // A feed listing the same delta twice still yields one chain link
        deltas.dedup_by(|a, b| version::same_release(&a.version, &b.version));
        deltas
    }
}
