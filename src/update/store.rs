// src/update/store.rs

//! Local package store
//!
//! A flat directory of release artifacts named
//! `{package_id}-{version}[-delta].{ext}`. In-flight downloads carry a
//! `.partial` suffix and only become visible under their real name
//! through an atomic rename, so a complete-looking name always refers to
//! a complete file.
//!
//! Local names are always derived from an asset's package id, version and
//! kind. The feed's `file_name` is only the key the asset is fetched by
//! from its source, so a publisher cannot choose where a download lands.

use crate::asset::{self, Asset, AssetKind};
use crate::error::{Error, Result};
use crate::filesystem::{OLD_SUFFIX, delete_hard};
use crate::version;
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix of in-flight downloads
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Directory holding downloaded and reconstructed packages
#[derive(Debug, Clone)]
pub struct PackageStore {
    dir: PathBuf,
    ext: String,
}

impl PackageStore {
    pub fn new(dir: impl Into<PathBuf>, archive_extension: &str) -> Self {
        Self {
            dir: dir.into(),
            ext: archive_extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::IoError(format!("Failed to create package store {}: {}", self.dir.display(), e))
        })
    }

    /// Store name of an asset, independent of its remote file name
    pub fn file_name_for(&self, asset: &Asset) -> String {
        asset::package_file_name(&asset.package_id, &asset.version, asset.kind, &self.ext)
    }

    /// Final location of an asset
    pub fn path_for(&self, asset: &Asset) -> PathBuf {
        self.dir.join(self.file_name_for(asset))
    }

    /// Download location of an asset while it is in flight
    pub fn partial_path(&self, asset: &Asset) -> PathBuf {
        self.dir.join(format!("{}{}", self.file_name_for(asset), PARTIAL_SUFFIX))
    }

    /// Whether the asset is present under its final name and verifies
    pub fn has_verified(&self, asset: &Asset) -> bool {
        let path = self.path_for(asset);
        if !path.is_file() {
            return false;
        }
        match asset.verify_file(&path) {
            Ok(()) => true,
            Err(e) => {
                debug!("Stored {} does not verify: {}", asset.file_name, e);
                false
            }
        }
    }

    /// Full packages of `package_id` present in the store, unordered
    pub fn full_packages(&self, package_id: &str) -> Result<Vec<(Version, PathBuf)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to read package store {}: {}",
                    self.dir.display(),
                    e
                )));
            }
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(version) = asset::parse_package_file_name(package_id, &name, &self.ext) {
                found.push((version, entry.path()));
            }
        }
        Ok(found)
    }

    /// The newest local full package, described as an asset
    ///
    /// Size and checksums are computed from the file, so the result can
    /// serve as the base of a delta chain.
    pub fn latest_full(&self, package_id: &str) -> Result<Option<Asset>> {
        let latest = self
            .full_packages(package_id)?
            .into_iter()
            .max_by(|(a, _), (b, _)| version::cmp_precedence(a, b));

        let Some((version, path)) = latest else {
            return Ok(None);
        };
        debug!("Latest local full package: {}", path.display());
        let asset = Asset::package(package_id, version, AssetKind::FullPackage, &self.ext)
            .with_digests_of(&path)?;
        Ok(Some(asset))
    }

    /// Remove every artifact except `keep`
    ///
    /// Deletes other packages with the store's extension, leftover
    /// `.partial` downloads and `.old` remnants of earlier hard deletes.
    /// Returns how many entries were removed.
    pub fn clean_except(&self, keep: &Path) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path == keep {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_package = path
                .extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(&self.ext));
            if !(is_package || name.ends_with(PARTIAL_SUFFIX) || name.ends_with(OLD_SUFFIX)) {
                continue;
            }

            match delete_hard(&path, false) {
                Ok(()) => {
                    debug!("Cleaned up {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to clean up {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("Removed {} stale file(s) from {}", removed, self.dir.display());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(files: &[&str]) -> (TempDir, PackageStore) {
        let temp = TempDir::new().unwrap();
        for name in files {
            fs::write(temp.path().join(name), name.as_bytes()).unwrap();
        }
        let store = PackageStore::new(temp.path(), "nupkg");
        (temp, store)
    }

    #[test]
    fn test_paths() {
        let (_temp, store) = store_with(&[]);
        let asset = Asset::package("App", Version::new(1, 2, 3), AssetKind::FullPackage, "nupkg");
        assert!(store.path_for(&asset).ends_with("App-1.2.3.nupkg"));
        assert!(store.partial_path(&asset).ends_with("App-1.2.3.nupkg.partial"));
    }

    #[test]
    fn test_paths_ignore_remote_file_name() {
        let (temp, store) = store_with(&[]);

        let mut escaping = Asset::package("App", Version::new(1, 1, 0), AssetKind::FullPackage, "zip");
        escaping.file_name = "../escaped.nupkg".to_string();
        assert_eq!(store.path_for(&escaping), temp.path().join("App-1.1.0.nupkg"));
        assert_eq!(
            store.partial_path(&escaping),
            temp.path().join("App-1.1.0.nupkg.partial")
        );

        // A publisher's own naming scheme still lands under the canonical name
        let mut renamed = Asset::package("App", Version::new(1, 1, 0), AssetKind::FullPackage, "nupkg");
        renamed.file_name = "App-1.1.0-full.nupkg".to_string();
        assert_eq!(store.path_for(&renamed), temp.path().join("App-1.1.0.nupkg"));

        let mut delta = Asset::package("App", Version::new(1, 1, 0), AssetKind::DeltaPackage, "nupkg");
        delta.file_name = "patches/1.1.0.nupkg".to_string();
        assert_eq!(store.path_for(&delta), temp.path().join("App-1.1.0-delta.nupkg"));
    }

    #[test]
    fn test_latest_full_ignores_deltas_and_other_apps() {
        let (_temp, store) = store_with(&[
            "App-1.0.0.nupkg",
            "App-1.10.0.nupkg",
            "App-1.9.0.nupkg",
            "App-2.0.0-delta.nupkg",
            "Other-9.0.0.nupkg",
            "App-3.0.0.nupkg.partial",
        ]);
        let latest = store.latest_full("App").unwrap().unwrap();
        assert_eq!(latest.version, Version::new(1, 10, 0));
        assert_eq!(latest.size, "App-1.10.0.nupkg".len() as u64);
        assert!(latest.verify_file(&store.path_for(&latest)).is_ok());
        assert!(store.has_verified(&latest));
    }

    #[test]
    fn test_latest_full_missing_store() {
        let store = PackageStore::new("/nonexistent/updraft/store", "nupkg");
        assert!(store.latest_full("App").unwrap().is_none());
    }

    #[test]
    fn test_clean_except() {
        let (temp, store) = store_with(&[
            "App-1.0.0.nupkg",
            "App-1.1.0-delta.nupkg",
            "App-1.1.0.nupkg",
            "App-1.2.0.nupkg.partial",
            ".App.lock",
            "notes.txt",
        ]);
        fs::create_dir(temp.path().join("work.old")).unwrap();
        fs::write(temp.path().join("work.old/file"), b"x").unwrap();

        let keep = temp.path().join("App-1.1.0.nupkg");
        assert_eq!(store.clean_except(&keep).unwrap(), 4);

        let mut left: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec![".App.lock", "App-1.1.0.nupkg", "notes.txt"]);
    }
}
