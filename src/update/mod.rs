// src/update/mod.rs

//! Update manager
//!
//! Host-facing entry point tying together an installed application, an
//! update source, the local package store and the update lock.
//!
//! # Flow
//!
//! ```ignore
//! use std::sync::Arc;
//! use updraft::{FileSource, InstalledApp, UpdateManager};
//! use updraft::progress::{CancelToken, LogProgress};
//!
//! let app = InstalledApp::new("MyApp", "1.0.0".parse()?, "stable");
//! let manager = UpdateManager::new(app, Arc::new(FileSource::new("/mnt/releases")), "/opt/myapp/packages");
//!
//! if let Some(info) = manager.check_for_updates()? {
//!     manager.download_updates(&info, &LogProgress::new("update"), false, &CancelToken::new())?;
//! }
//! ```
//!
//! Applying the downloaded package and restarting the application belong
//! to the host.

mod lock;
mod pipeline;
pub mod plan;
pub mod store;

pub use lock::{FileUpdateLock, InMemoryUpdateLock, LockHandle, UpdateLock};
pub use plan::{UpdateInfo, check_for_updates};
pub use store::PackageStore;

use crate::asset::{Asset, AssetFeed};
use crate::config::{UpdateConfig, UpdateOptions};
use crate::error::{Error, Result};
use crate::progress::{CancelToken, ProgressSink};
use crate::source::UpdateSource;
use crate::version;
use pipeline::Pipeline;
use semver::Version;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Identity of the installed application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApp {
    pub id: String,
    /// `None` when the application has no recorded installation
    pub version: Option<Version>,
    /// Channel the installed release came from; empty means the platform default
    pub channel: String,
}

impl InstalledApp {
    pub fn new(id: impl Into<String>, version: Version, channel: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: Some(version),
            channel: channel.into(),
        }
    }

    /// An application that is known by id but not installed
    pub fn not_installed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            channel: String::new(),
        }
    }
}

/// Channel used when neither the installation nor the options name one
pub fn default_channel() -> &'static str {
    match std::env::consts::OS {
        "windows" => "win",
        "macos" => "osx",
        _ => "linux",
    }
}

/// Checks for, downloads and stages updates for one application
pub struct UpdateManager {
    app: InstalledApp,
    source: Arc<dyn UpdateSource>,
    store_dir: PathBuf,
    store: PackageStore,
    config: UpdateConfig,
    options: UpdateOptions,
    lock: Arc<dyn UpdateLock>,
}

impl UpdateManager {
    /// Create a manager storing packages in `store_dir`
    ///
    /// Uses the default configuration and a lock file in the store.
    pub fn new(
        app: InstalledApp,
        source: Arc<dyn UpdateSource>,
        store_dir: impl Into<PathBuf>,
    ) -> Self {
        let store_dir = store_dir.into();
        let config = UpdateConfig::default();
        Self {
            app,
            source,
            store: PackageStore::new(&store_dir, config.extension()),
            lock: Arc::new(FileUpdateLock::new(&store_dir)),
            store_dir,
            config,
            options: UpdateOptions::default(),
        }
    }

    pub fn with_config(mut self, config: UpdateConfig) -> Self {
        self.store = PackageStore::new(&self.store_dir, config.extension());
        self.config = config;
        self
    }

    pub fn with_options(mut self, options: UpdateOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the update lock, e.g. with an [`InMemoryUpdateLock`]
    pub fn with_lock(mut self, lock: Arc<dyn UpdateLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn app_id(&self) -> &str {
        &self.app.id
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn store(&self) -> &PackageStore {
        &self.store
    }

    /// The installed version
    ///
    /// # Errors
    /// `NotInstalled` if the application has no recorded version.
    pub fn current_version(&self) -> Result<&Version> {
        self.app.version.as_ref().ok_or(Error::NotInstalled)
    }

    /// Channel to follow: the explicit one from the options, else the
    /// installed one, else the platform default
    pub fn practical_channel(&self) -> &str {
        let channel = self
            .options
            .explicit_channel
            .as_deref()
            .unwrap_or(&self.app.channel);
        if channel.is_empty() { default_channel() } else { channel }
    }

    fn installed_channel(&self) -> &str {
        if self.app.channel.is_empty() {
            default_channel()
        } else {
            &self.app.channel
        }
    }

    /// Fetch the feed for the practical channel
    pub fn get_release_feed(&self) -> Result<AssetFeed> {
        self.current_version()?;
        let channel = self.practical_channel();
        self.config
            .retry
            .run("Fetch release feed", || self.source.get_release_feed(channel))
    }

    /// Fetch the feed and decide whether an update applies
    pub fn check_for_updates(&self) -> Result<Option<UpdateInfo>> {
        let installed = self.current_version()?;
        let feed = self.get_release_feed()?;
        let local_base = self.store.latest_full(&self.app.id)?;

        Ok(plan::check_for_updates(
            installed,
            self.installed_channel(),
            local_base.as_ref(),
            &feed,
            self.options.allow_downgrade,
        ))
    }

    /// Download (or rebuild from deltas) the target package of `info`
    ///
    /// Holds the update lock for the whole operation.
    ///
    /// # Errors
    /// - `NotInstalled` without an installed version
    /// - `AlreadyInProgress` if another update holds the lock
    /// - `Cancelled` if `cancel` fires; partial downloads stay for the next run
    /// - any error of the full-package download (delta failures fall back
    ///   to it and are only logged)
    pub fn download_updates(
        &self,
        info: &UpdateInfo,
        progress: &dyn ProgressSink,
        ignore_deltas: bool,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.current_version()?;
        let _guard = self.lock.try_acquire(&self.app.id)?;

        Pipeline {
            source: self.source.as_ref(),
            store: &self.store,
            config: &self.config,
        }
        .run(info, progress, ignore_deltas, cancel)
    }

    /// A downloaded full package newer than the installed version, if any
    pub fn update_pending_restart(&self) -> Result<Option<Asset>> {
        let installed = self.current_version()?;
        let pending = self
            .store
            .latest_full(&self.app.id)?
            .filter(|asset| version::is_newer(&asset.version, installed));
        if let Some(asset) = &pending {
            info!("Update {} is downloaded and pending restart", asset.version);
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileSource;
    use tempfile::TempDir;

    fn manager(app: InstalledApp, temp: &TempDir) -> UpdateManager {
        UpdateManager::new(
            app,
            Arc::new(FileSource::new(temp.path().join("releases"))),
            temp.path().join("packages"),
        )
    }

    #[test]
    fn test_not_installed() {
        let temp = TempDir::new().unwrap();
        let manager = manager(InstalledApp::not_installed("App"), &temp);

        assert!(matches!(manager.current_version(), Err(Error::NotInstalled)));
        assert!(matches!(manager.get_release_feed(), Err(Error::NotInstalled)));
        assert!(matches!(manager.check_for_updates(), Err(Error::NotInstalled)));
        assert!(matches!(manager.update_pending_restart(), Err(Error::NotInstalled)));
    }

    #[test]
    fn test_practical_channel() {
        let temp = TempDir::new().unwrap();
        let app = InstalledApp::new("App", Version::new(1, 0, 0), "stable");
        let m = manager(app.clone(), &temp);
        assert_eq!(m.practical_channel(), "stable");

        let m = manager(app, &temp).with_options(UpdateOptions {
            explicit_channel: Some("beta".into()),
            ..Default::default()
        });
        assert_eq!(m.practical_channel(), "beta");

        let m = manager(InstalledApp::new("App", Version::new(1, 0, 0), ""), &temp);
        assert_eq!(m.practical_channel(), default_channel());
    }

    #[test]
    fn test_missing_feed_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let config = UpdateConfig {
            retry: crate::retry::RetryPolicy::none(),
            ..Default::default()
        };
        let m = manager(InstalledApp::new("App", Version::new(1, 0, 0), "stable"), &temp)
            .with_config(config);
        assert!(matches!(m.check_for_updates(), Err(Error::FeedUnavailable(_))));
    }
}
