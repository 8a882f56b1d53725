// src/update/pipeline.rs

//! Acquisition and install pipeline
//!
//! Gets the target full package of an [`UpdateInfo`] into the package
//! store, preferring to rebuild it from the local base plus a delta chain
//! and falling back to downloading it whole.
//!
//! # Delta path progress
//!
//! | Stage | Range |
//! |---|---|
//! | extract base | 0..10 |
//! | download deltas (parallel) | 10..45 |
//! | apply deltas | 45..80 |
//! | re-archive and verify | 80..100 |
//!
//! A fallback continues from wherever the delta path stopped, so the host
//! never sees progress go backwards.

use super::UpdateInfo;
use super::store::PackageStore;
use crate::archive::{create_archive, extract_archive};
use crate::asset::Asset;
use crate::config::UpdateConfig;
use crate::delta::DeltaApplier;
use crate::error::{Error, Result};
use crate::filesystem::move_file_atomic;
use crate::progress::{
    ByteAggregator, CancelToken, MonotonicProgress, ProgressSink, RangeProgress,
};
use crate::source::UpdateSource;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EXTRACT_END: u8 = 10;
const DOWNLOAD_END: u8 = 45;
const APPLY_END: u8 = 80;

/// Downloads attempted when the result fails its checksum
const CHECKSUM_ATTEMPTS: u32 = 2;

/// One download-and-install run against a package store
pub(crate) struct Pipeline<'a> {
    pub source: &'a dyn UpdateSource,
    pub store: &'a PackageStore,
    pub config: &'a UpdateConfig,
}

impl Pipeline<'_> {
    /// Make the target full package present and verified in the store
    ///
    /// The caller holds the update lock.
    pub fn run(
        &self,
        info: &UpdateInfo,
        progress: &dyn ProgressSink,
        ignore_deltas: bool,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.store.ensure_dir()?;
        let target = &info.target_full;
        let target_path = self.store.path_for(target);

        if self.store.has_verified(target) {
            info!("Package already exists on disk, skipping download: {}", target_path.display());
            progress.report(100);
            return Ok(());
        }

        let overall = MonotonicProgress::new(progress);
        let mut done = false;

        if !ignore_deltas && self.delta_chain_usable(info) {
            match self.download_via_deltas(info, &overall, cancel) {
                Ok(()) => done = true,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => warn!("Delta update failed, falling back to full package: {}", e),
            }
        }

        if !done {
            let resume = RangeProgress::new(&overall, overall.current(), 100);
            self.download_verified(target, &resume, cancel)?;
        }

        if let Err(e) = self.store.clean_except(&target_path) {
            warn!("Failed to clean package store: {}", e);
        }
        overall.report(100);
        info!("Successfully placed {}", target_path.display());
        Ok(())
    }

    /// Whether the plan's delta chain is worth trying
    fn delta_chain_usable(&self, info: &UpdateInfo) -> bool {
        let Some(base) = info.base_release.as_ref().filter(|_| !info.deltas.is_empty()) else {
            debug!("No delta chain for {}", info.target_full.version);
            return false;
        };

        if info.deltas.len() > self.config.max_delta_count {
            info!(
                "Delta chain of {} exceeds limit of {}, using full package",
                info.deltas.len(),
                self.config.max_delta_count
            );
            return false;
        }

        let limit = info.target_full.size as f64 * self.config.max_delta_size_ratio;
        if info.target_full.size > 0 && info.delta_bytes() as f64 > limit {
            info!(
                "Deltas total {} bytes, more than {:.0} allowed, using full package",
                info.delta_bytes(),
                limit
            );
            return false;
        }

        // Contents were matched against the feed when the plan was made
        if !self.store.path_for(base).is_file() {
            warn!("Local base {} is gone, using full package", base.version);
            return false;
        }
        true
    }

    fn download_via_deltas(
        &self,
        info: &UpdateInfo,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        let Some(base) = info.base_release.as_ref() else {
            return Err(Error::DeltaError("No base release for delta chain".to_string()));
        };
        let target = &info.target_full;
        info!(
            "Rebuilding {} from {} and {} delta(s)",
            target.file_name,
            base.file_name,
            info.deltas.len()
        );

        // Scratch lives in the store so the final rename stays on one device
        let scratch = tempfile::Builder::new()
            .prefix(".updraft-")
            .tempdir_in(self.store.dir())
            .map_err(|e| Error::IoError(format!("Failed to create scratch directory: {}", e)))?;
        let work = scratch.path().join("work");

        let extract = RangeProgress::new(progress, 0, EXTRACT_END);
        extract_archive(&self.store.path_for(base), &work, cancel)?;
        extract.report(100);

        let downloads = RangeProgress::new(progress, EXTRACT_END, DOWNLOAD_END);
        let delta_paths = self.download_deltas(&info.deltas, &downloads, cancel)?;

        let apply = RangeProgress::new(progress, DOWNLOAD_END, APPLY_END);
        let stats = DeltaApplier::new(self.config).apply_chain(&work, &delta_paths, &apply, cancel)?;
        info!(
            "Applied deltas: {} patched, {} unchanged, {} copied, {} deleted",
            stats.patched, stats.unchanged, stats.copied, stats.deleted
        );

        let finalize = RangeProgress::new(progress, APPLY_END, 100);
        let partial = self.store.partial_path(target);
        remove_if_exists(&partial)?;
        create_archive(&work, &partial, &finalize, cancel)?;

        if self.config.verify_reconstructed {
            target.verify_file(&partial)?;
        }
        self.promote(&partial, &self.store.path_for(target))
    }

    /// Download every delta in parallel, returning their paths in order
    fn download_deltas(
        &self,
        deltas: &[Asset],
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Vec<PathBuf>> {
        let total: u64 = deltas.iter().map(|d| d.size).sum();
        let aggregator = ByteAggregator::new(progress, total);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_count())
            .build()
            .map_err(|e| Error::IoError(format!("Failed to create download pool: {}", e)))?;

        pool.install(|| {
            deltas
                .par_iter()
                .map(|delta| {
                    cancel.check()?;
                    self.download_verified(delta, &aggregator.item(delta.size), cancel)
                })
                .collect::<Result<Vec<_>>>()
        })
    }

    /// Download an asset into the store unless a verified copy is there
    ///
    /// Transient failures are retried per the configured policy. A
    /// download that completes but fails its checksum is deleted and
    /// fetched once more before the mismatch is reported.
    fn download_verified(
        &self,
        asset: &Asset,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let path = self.store.path_for(asset);
        if self.store.has_verified(asset) {
            debug!("{} already present, skipping download", asset.file_name);
            progress.report(100);
            return Ok(path);
        }

        let partial = self.store.partial_path(asset);
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!("Downloading {}", asset.file_name);
            self.config
                .retry
                .run(&format!("Download {}", asset.file_name), || {
                    cancel.check()?;
                    self.source.download_asset(asset, &partial, progress, cancel)
                })?;

            match asset.verify_file(&partial) {
                Ok(()) => break,
                Err(e @ Error::ChecksumMismatch { .. }) => {
                    remove_if_exists(&partial)?;
                    if attempt >= CHECKSUM_ATTEMPTS {
                        return Err(e);
                    }
                    warn!("Downloaded {} is corrupt ({}), downloading again", asset.file_name, e);
                }
                Err(e) => return Err(e),
            }
        }

        self.promote(&partial, &path)?;
        Ok(path)
    }

    fn promote(&self, partial: &Path, path: &Path) -> Result<()> {
        move_file_atomic(partial, path).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {}",
                partial.display(),
                path.display(),
                e
            ))
        })
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::IoError(format!("Failed to remove {}: {}", path.display(), e))),
    }
}
