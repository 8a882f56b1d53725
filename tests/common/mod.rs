// tests/common/mod.rs

//! Shared fixtures for integration tests: release packages, delta chains
//! and feeds published into a directory served by `FileSource`.

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use updraft::archive::{create_archive, extract_archive};
use updraft::filesystem::{native_path, relative_files};
use updraft::progress::{CancelToken, ProgressSink, SilentProgress};
use updraft::{
    Asset, AssetFeed, AssetKind, DeltaBuilder, FileSource, InMemoryUpdateLock, InstalledApp,
    RetryPolicy, UpdateConfig, UpdateManager, UpdateSource,
};

pub const APP_ID: &str = "TestApp";

/// Deterministic pseudo-random bytes (xorshift), poorly compressible
pub fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

/// Files of release number `n` (0-based)
///
/// A large binary that changes a little each release, a config that
/// changes every other release, a file that only exists in release 0, a
/// file added per release and a manifest outside the payload root.
pub fn release_files(n: usize, version: &str) -> Vec<(String, Vec<u8>)> {
    let mut binary = noise(7, 256 * 1024);
    for i in 0..=n {
        let at = 1000 + i * 4096;
        binary[at..at + 8].copy_from_slice(format!("rel{:05}", i).as_bytes());
    }

    let mut files = vec![
        ("lib/app.bin".to_string(), binary),
        (
            "lib/config.json".to_string(),
            format!("{{\"generation\": {}}}", n / 2).into_bytes(),
        ),
        (
            format!("lib/release-{}.txt", n),
            format!("added in release {}\n", n).into_bytes(),
        ),
        (
            format!("{}.nuspec", APP_ID),
            format!("<package><id>{}</id><version>{}</version></package>", APP_ID, version)
                .into_bytes(),
        ),
    ];
    if n == 0 {
        files.push(("lib/legacy.dll".to_string(), noise(99, 2048)));
    }
    files
}

pub fn write_tree(root: &Path, files: &[(String, Vec<u8>)]) {
    for (relative, content) in files {
        let path = native_path(root, relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// A directory of published releases plus an empty local package store
pub struct Fixture {
    pub temp: TempDir,
    pub releases: PathBuf,
    pub packages: PathBuf,
    /// Full packages, ascending
    pub fulls: Vec<Asset>,
    /// `deltas[i]` turns `fulls[i]` into `fulls[i + 1]`
    pub deltas: Vec<Asset>,
}

impl Fixture {
    /// Build one full package per version and a delta between neighbours
    pub fn new(versions: &[&str]) -> Self {
        let temp = TempDir::new().unwrap();
        let releases = temp.path().join("releases");
        let packages = temp.path().join("packages");
        fs::create_dir_all(&releases).unwrap();

        let cancel = CancelToken::new();
        let mut fulls = Vec::new();
        for (n, version) in versions.iter().enumerate() {
            let tree = temp.path().join(format!("tree-{}", version));
            write_tree(&tree, &release_files(n, version));

            let asset = Asset::package(
                APP_ID,
                version.parse().unwrap(),
                AssetKind::FullPackage,
                "nupkg",
            );
            let path = releases.join(&asset.file_name);
            create_archive(&tree, &path, &SilentProgress, &cancel).unwrap();
            fulls.push(asset.with_digests_of(&path).unwrap());
        }

        let builder = DeltaBuilder::new(&test_config());
        let deltas = fulls
            .windows(2)
            .map(|pair| {
                builder
                    .build_release(&pair[0], &pair[1], &releases, &SilentProgress, &cancel)
                    .unwrap()
                    .0
            })
            .collect();

        Self {
            temp,
            releases,
            packages,
            fulls,
            deltas,
        }
    }

    /// Every full and delta package
    pub fn all_assets(&self) -> Vec<Asset> {
        self.fulls.iter().chain(&self.deltas).cloned().collect()
    }

    /// Write `releases.{channel}.json` listing `assets`
    pub fn publish(&self, channel: &str, assets: &[Asset]) {
        let feed = AssetFeed::new(channel, assets.to_vec());
        fs::write(
            self.releases.join(format!("releases.{}.json", channel)),
            feed.to_json().unwrap(),
        )
        .unwrap();
    }

    /// Copy a published package into the local store
    pub fn seed_local(&self, asset: &Asset) {
        fs::create_dir_all(&self.packages).unwrap();
        fs::copy(
            self.releases.join(&asset.file_name),
            self.packages.join(&asset.file_name),
        )
        .unwrap();
    }

    pub fn manager(&self, installed: &str, channel: &str) -> UpdateManager {
        self.manager_with(Arc::new(FileSource::new(&self.releases)), installed, channel)
    }

    pub fn manager_with(
        &self,
        source: Arc<dyn UpdateSource>,
        installed: &str,
        channel: &str,
    ) -> UpdateManager {
        UpdateManager::new(
            InstalledApp::new(APP_ID, installed.parse().unwrap(), channel),
            source,
            &self.packages,
        )
        .with_config(test_config())
        .with_lock(Arc::new(InMemoryUpdateLock::new()))
    }

    /// Names of the files currently in the local store
    pub fn stored_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.packages)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        names
    }
}

/// Config with fast retries so failure paths finish quickly
pub fn test_config() -> UpdateConfig {
    UpdateConfig {
        max_parallelism: Some(2),
        retry: RetryPolicy::new(1, 0),
        ..Default::default()
    }
}

/// Rewrite an archive with its first patch entry truncated
///
/// Returns the asset describing the damaged archive, so the download
/// itself verifies and the damage only shows when the patch is applied.
pub fn truncate_first_patch(archive: &Path, asset: &Asset) -> Asset {
    let scratch = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    extract_archive(archive, scratch.path(), &cancel).unwrap();

    let patch = relative_files(scratch.path())
        .unwrap()
        .into_iter()
        .find(|f| f.ends_with(".zsdiff") || f.ends_with(".bsdiff"))
        .expect("delta has a patch entry");
    let path = native_path(scratch.path(), &patch);
    let content = fs::read(&path).unwrap();
    fs::write(&path, &content[..content.len() / 2]).unwrap();

    fs::remove_file(archive).unwrap();
    create_archive(scratch.path(), archive, &SilentProgress, &cancel).unwrap();

    let mut damaged = asset.clone().with_digests_of(archive).unwrap();
    damaged.notes_markdown = asset.notes_markdown.clone();
    damaged
}

/// Source wrapper recording downloads and optionally corrupting them
pub struct RecordingSource {
    inner: FileSource,
    downloads: Mutex<Vec<String>>,
    corrupt: Mutex<HashSet<String>>,
}

impl RecordingSource {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: FileSource::new(root),
            downloads: Mutex::new(Vec::new()),
            corrupt: Mutex::new(HashSet::new()),
        }
    }

    /// Serve garbage for `file_name` on its next download only
    pub fn corrupt_once(&self, file_name: &str) {
        self.corrupt.lock().unwrap().insert(file_name.to_string());
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

impl UpdateSource for RecordingSource {
    fn get_release_feed(&self, channel: &str) -> updraft::Result<AssetFeed> {
        self.inner.get_release_feed(channel)
    }

    fn download_asset(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> updraft::Result<()> {
        self.downloads.lock().unwrap().push(asset.file_name.clone());
        if self.corrupt.lock().unwrap().remove(&asset.file_name) {
            fs::write(dest, noise(1, asset.size as usize)).unwrap();
            progress.report(100);
            return Ok(());
        }
        self.inner.download_asset(asset, dest, progress, cancel)
    }
}
