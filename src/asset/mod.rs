// src/asset/mod.rs

//! Release assets and feeds
//!
//! An [`Asset`] describes one downloadable artifact of a release: a full
//! package, a delta package, a portable archive or a setup program. An
//! [`AssetFeed`] is the list of assets published for one release channel.
//!
//! # File naming
//!
//! Package artifacts use deterministic names so the local store can be
//! scanned without a database:
//!
//! ```text
//! {package_id}-{version}.{ext}          full package
//! {package_id}-{version}-delta.{ext}    delta package
//! ```

mod feed;

pub use feed::AssetFeed;

use crate::error::{Error, Result};
use crate::hash::{self, HashAlgorithm};
use semver::Version;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default extension for package archives
pub const DEFAULT_ARCHIVE_EXT: &str = "nupkg";

/// File-stem suffix that marks a delta package
pub const DELTA_SUFFIX: &str = "-delta";

/// Kind of release artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Complete package archive for a version
    FullPackage,
    /// Patch set from the previous version to this one
    DeltaPackage,
    /// Self-contained archive, not used by the updater
    Portable,
    /// First-time installer, not used by the updater
    Setup,
}

impl AssetKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FullPackage => "FullPackage",
            Self::DeltaPackage => "DeltaPackage",
            Self::Portable => "Portable",
            Self::Setup => "Setup",
        }
    }

    /// Whether this kind is a package the update pipeline can consume
    pub const fn is_package(&self) -> bool {
        matches!(self, Self::FullPackage | Self::DeltaPackage)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = Error;

    /// Accepts both current names and the short names older feeds use
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fullpackage" | "full" => Ok(Self::FullPackage),
            "deltapackage" | "delta" => Ok(Self::DeltaPackage),
            "portable" => Ok(Self::Portable),
            "setup" | "installer" | "msi" => Ok(Self::Setup),
            _ => Err(Error::MalformedFeed(format!("unknown asset type '{}'", s))),
        }
    }
}

/// One downloadable artifact of a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub package_id: String,
    pub version: Version,
    pub kind: AssetKind,
    pub file_name: String,
    /// Uppercase or lowercase hex, compared case-insensitively
    pub sha1: String,
    pub sha256: Option<String>,
    pub size: u64,
    pub notes_markdown: Option<String>,
    pub notes_html: Option<String>,
}

impl Asset {
    /// Create a package asset with its deterministic file name
    ///
    /// Checksums and size start empty; fill them with [`Asset::with_digests_of`]
    /// or set them directly.
    pub fn package(package_id: &str, version: Version, kind: AssetKind, ext: &str) -> Self {
        let file_name = package_file_name(package_id, &version, kind, ext);
        Self {
            package_id: package_id.to_string(),
            version,
            kind,
            file_name,
            sha1: String::new(),
            sha256: None,
            size: 0,
            notes_markdown: None,
            notes_html: None,
        }
    }

    /// Fill size and both checksums from a file on disk
    pub fn with_digests_of(mut self, path: &Path) -> Result<Self> {
        let (sha1, sha256) = hash::digest_file(path)?;
        self.size = std::fs::metadata(path)?.len();
        self.sha1 = sha1.value.to_uppercase();
        self.sha256 = Some(sha256.value);
        Ok(self)
    }

    pub fn is_delta(&self) -> bool {
        self.kind == AssetKind::DeltaPackage
    }

    pub fn is_full(&self) -> bool {
        self.kind == AssetKind::FullPackage
    }

    /// Whether two descriptions denote the same bytes
    ///
    /// Compares size, then SHA-256 when both carry it, else SHA-1 when
    /// both carry it. Without a shared digest the sizes decide.
    pub fn same_content(&self, other: &Asset) -> bool {
        fn digest(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|v| !v.is_empty())
        }

        if self.size != other.size {
            return false;
        }
        if let (Some(a), Some(b)) = (digest(self.sha256.as_deref()), digest(other.sha256.as_deref())) {
            return a.eq_ignore_ascii_case(b);
        }
        match (digest(Some(&self.sha1)), digest(Some(&other.sha1))) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        }
    }

    /// Verify a file on disk against this asset's size and checksum
    ///
    /// A missing file or a size mismatch fails before any hashing. SHA-256
    /// is checked when the feed provides it, SHA-1 otherwise.
    pub fn verify_file(&self, path: &Path) -> Result<()> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => {
                return Err(Error::ChecksumMismatch {
                    expected: format!("{} ({} bytes)", self.file_name, self.size),
                    actual: "file missing".to_string(),
                });
            }
        };

        if metadata.len() != self.size {
            return Err(Error::ChecksumMismatch {
                expected: format!("{} bytes", self.size),
                actual: format!("{} bytes", metadata.len()),
            });
        }

        match self.sha256.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(expected) => hash::verify_file(path, expected, HashAlgorithm::Sha256),
            None => hash::verify_file(path, &self.sha1, HashAlgorithm::Sha1),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.package_id, self.version, self.kind)
    }
}

/// Deterministic file name for a package artifact
pub fn package_file_name(package_id: &str, version: &Version, kind: AssetKind, ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    match kind {
        AssetKind::DeltaPackage => format!("{}-{}{}.{}", package_id, version, DELTA_SUFFIX, ext),
        AssetKind::Portable => format!("{}-{}-portable.zip", package_id, version),
        AssetKind::Setup => format!("{}-{}-setup.exe", package_id, version),
        AssetKind::FullPackage => format!("{}-{}.{}", package_id, version, ext),
    }
}

/// Whether a file name denotes a delta package (stem ends with `-delta`)
pub fn is_delta_file(file_name: &str) -> bool {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    stem.to_ascii_lowercase().ends_with(DELTA_SUFFIX)
}

/// Recover the version from a full-package file name
///
/// Returns `None` for delta packages, other applications' packages and
/// names whose version segment is not valid semver.
pub fn parse_package_file_name(package_id: &str, file_name: &str, ext: &str) -> Option<Version> {
    if is_delta_file(file_name) {
        return None;
    }
    let ext = ext.trim_start_matches('.');
    let rest = file_name.strip_prefix(package_id)?.strip_prefix('-')?;
    let version = rest.strip_suffix(ext)?.strip_suffix('.')?;
    crate::version::parse_version(version).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            package_file_name("MyApp", &v("1.2.0"), AssetKind::FullPackage, "nupkg"),
            "MyApp-1.2.0.nupkg"
        );
        assert_eq!(
            package_file_name("MyApp", &v("1.2.0"), AssetKind::DeltaPackage, ".nupkg"),
            "MyApp-1.2.0-delta.nupkg"
        );
    }

    #[test]
    fn test_is_delta_file() {
        assert!(is_delta_file("MyApp-1.2.0-delta.nupkg"));
        assert!(is_delta_file("MyApp-1.2.0-DELTA.nupkg"));
        assert!(!is_delta_file("MyApp-1.2.0.nupkg"));
        assert!(!is_delta_file("delta-tool-1.0.0.nupkg"));
    }

    #[test]
    fn test_parse_package_file_name() {
        assert_eq!(
            parse_package_file_name("my-app", "my-app-2.0.0-beta.1.nupkg", "nupkg"),
            Some(v("2.0.0-beta.1"))
        );
        assert_eq!(parse_package_file_name("my-app", "my-app-2.0.0-delta.nupkg", "nupkg"), None);
        assert_eq!(parse_package_file_name("my-app", "other-2.0.0.nupkg", "nupkg"), None);
        assert_eq!(parse_package_file_name("my-app", "my-app-2.0.0.nupkg.partial", "nupkg"), None);
    }

    #[test]
    fn test_kind_parse_accepts_legacy_names() {
        assert_eq!("Full".parse::<AssetKind>().unwrap(), AssetKind::FullPackage);
        assert_eq!("DeltaPackage".parse::<AssetKind>().unwrap(), AssetKind::DeltaPackage);
        assert_eq!("Installer".parse::<AssetKind>().unwrap(), AssetKind::Setup);
        assert!("Firmware".parse::<AssetKind>().is_err());
    }

    #[test]
    fn test_verify_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"package bytes").unwrap();

        let asset = Asset::package("app", v("1.0.0"), AssetKind::FullPackage, "nupkg")
            .with_digests_of(file.path())
            .unwrap();
        assert!(asset.verify_file(file.path()).is_ok());

        // SHA-1 path when no SHA-256 is published
        let mut sha1_only = asset.clone();
        sha1_only.sha256 = None;
        assert!(sha1_only.verify_file(file.path()).is_ok());

        let mut wrong_size = asset.clone();
        wrong_size.size += 1;
        assert!(matches!(
            wrong_size.verify_file(file.path()),
            Err(Error::ChecksumMismatch { .. })
        ));

        let missing = file.path().with_extension("missing");
        assert!(asset.verify_file(&missing).is_err());
    }

    #[test]
    fn test_same_content() {
        let mut published = Asset::package("app", v("1.0.0"), AssetKind::FullPackage, "nupkg");
        published.size = 4;
        published.sha1 = "A9993E364706816ABA3E25717850C26C9CD0D89D".to_string();

        let mut local = published.clone();
        local.sha1 = local.sha1.to_lowercase();
        local.sha256 = Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855".into());
        assert!(local.same_content(&published));

        // SHA-256 wins when both sides carry it
        let mut other = local.clone();
        other.sha256 = Some("0".repeat(64));
        assert!(!local.same_content(&other));

        let mut resized = published.clone();
        resized.size = 5;
        assert!(!resized.same_content(&published));

        let mut sha1_differs = published.clone();
        sha1_differs.sha1 = "da39a3ee5e6b4b0d3255bfef95601890afd80709".to_string();
        assert!(!sha1_differs.same_content(&local));
    }

    #[test]
    fn test_verify_detects_same_size_corruption() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"aaaa").unwrap();
        let asset = Asset::package("app", v("1.0.0"), AssetKind::FullPackage, "nupkg")
            .with_digests_of(file.path())
            .unwrap();

        std::fs::write(file.path(), b"aaab").unwrap();
        assert!(matches!(
            asset.verify_file(file.path()),
            Err(Error::ChecksumMismatch { .. })
        ));
    }
}
