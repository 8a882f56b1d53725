// src/delta/generator.rs

//! Delta package builder
//!
//! Extracts the base and new full packages, diffs every payload file of
//! the new release against its base counterpart on a bounded worker pool,
//! and re-archives the new tree with patches in place of changed files.
//!
//! New payload files whose names end in a delta entry extension (`.diff`,
//! `.shasum`, `.bsdiff`, `.zsdiff`) cannot be told apart from the entries
//! themselves, so such releases are refused and must ship as full packages.

use super::format::{EntryKind, PatchFormat, SAME_EXT, SHASUM_EXT, Shasum, classify_entry};
use super::{DeltaStats, MAX_DELTA_RATIO};
use crate::archive::{self, create_archive, extract_archive};
use crate::asset::{Asset, AssetKind};
use crate::config::UpdateConfig;
use crate::error::{Error, Result};
use crate::filesystem::{files_equal, move_file_atomic, native_path, relative_files};
use crate::progress::{CancelToken, ProgressSink, RangeProgress, percent_of};
use crate::retry::RetryPolicy;
use crate::version;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Share of build progress spent diffing; the rest is re-archiving
const DIFF_PROGRESS: u8 = 70;

/// How one payload file ended up in the delta
#[derive(Debug, Clone, Copy)]
enum FileOutcome {
    New,
    Same,
    Changed { new_size: u64, patch_size: u64 },
}

/// Builds delta packages from two full packages
pub struct DeltaBuilder {
    format: PatchFormat,
    zstd_level: i32,
    workers: usize,
    retry: RetryPolicy,
    payload_root: String,
}

impl DeltaBuilder {
    /// Create a builder from engine configuration
    pub fn new(config: &UpdateConfig) -> Self {
        Self {
            format: config.patch_format,
            zstd_level: config.zstd_level,
            workers: config.worker_count(),
            retry: config.retry,
            payload_root: config.payload_root.trim_matches('/').to_string(),
        }
    }

    /// Override the preferred patch format
    pub fn with_format(mut self, format: PatchFormat) -> Self {
        self.format = format;
        self
    }

    /// Build the delta package for `new_asset` and describe it as an asset
    ///
    /// Both full packages must live in `packages_dir`; the delta is written
    /// there under its deterministic name.
    ///
    /// # Errors
    /// Fails when the base release is not older than the new one.
    pub fn build_release(
        &self,
        base_asset: &Asset,
        new_asset: &Asset,
        packages_dir: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<(Asset, DeltaStats)> {
        if !version::is_newer(&new_asset.version, &base_asset.version) {
            return Err(Error::DeltaError(format!(
                "Base version {} must be older than new version {}",
                base_asset.version, new_asset.version
            )));
        }

        let ext = Path::new(&new_asset.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(crate::asset::DEFAULT_ARCHIVE_EXT);
        let delta = Asset::package(
            &new_asset.package_id,
            new_asset.version.clone(),
            AssetKind::DeltaPackage,
            ext,
        );
        let output = packages_dir.join(&delta.file_name);

        let stats = self.build(
            &packages_dir.join(&base_asset.file_name),
            &packages_dir.join(&new_asset.file_name),
            &output,
            progress,
            cancel,
        )?;

        let mut delta = delta.with_digests_of(&output)?;
        delta.notes_markdown = new_asset.notes_markdown.clone();
        delta.notes_html = new_asset.notes_html.clone();
        Ok((delta, stats))
    }

    /// Build a delta package at `output` turning `base` into `new`
    pub fn build(
        &self,
        base: &Path,
        new: &Path,
        output: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<DeltaStats> {
        if output.exists() {
            return Err(Error::DeltaError(format!(
                "Output {} already exists",
                output.display()
            )));
        }
        for input in [base, new] {
            if !input.is_file() {
                return Err(Error::NotFoundError(format!(
                    "Package {} does not exist",
                    input.display()
                )));
            }
        }

        let format = PatchFormat::resolve(self.format);
        info!(
            "Building {} delta {} -> {}",
            format,
            base.display(),
            new.display()
        );

        let scratch = TempDir::new()
            .map_err(|e| Error::IoError(format!("Failed to create scratch directory: {}", e)))?;
        let base_dir = scratch.path().join("base");
        let new_dir = scratch.path().join("new");
        extract_archive(base, &base_dir, cancel)?;
        extract_archive(new, &new_dir, cancel)?;

        let base_payload: HashSet<String> = self.payload_files(&base_dir)?.into_iter().collect();
        let new_payload = self.payload_files(&new_dir)?;
        check_payload_names(&new_payload)?;

        let diff_progress = RangeProgress::new(progress, 0, DIFF_PROGRESS);
        let outcomes = self.diff_all(format, &base_dir, &new_dir, &new_payload, &diff_progress, cancel)?;

        let mut stats = DeltaStats {
            processed: new_payload.len(),
            ..Default::default()
        };
        for (outcome, retries) in outcomes {
            stats.retries += retries;
            match outcome {
                FileOutcome::New => stats.new_files += 1,
                FileOutcome::Same => stats.same_files += 1,
                FileOutcome::Changed { new_size, patch_size } => {
                    stats.changed_files += 1;
                    stats.changed_bytes += new_size;
                    stats.patch_bytes += patch_size;
                }
            }
        }
        let new_set: HashSet<&str> = new_payload.iter().map(String::as_str).collect();
        stats.removed_files = base_payload
            .iter()
            .filter(|f| !new_set.contains(f.as_str()))
            .count();

        let partial = partial_path(output);
        let archive_progress = RangeProgress::new(progress, DIFF_PROGRESS, 100);
        let written = create_archive(&new_dir, &partial, &archive_progress, cancel)
            .and_then(|_| move_file_atomic(&partial, output).map_err(Error::from));
        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        let metrics = stats.metrics();
        info!(
            "Delta written to {}: {} changed, {} unchanged, {} new, {} removed ({:.1}% of changed bytes saved)",
            output.display(),
            stats.changed_files,
            stats.same_files,
            stats.new_files,
            stats.removed_files,
            metrics.savings_percentage()
        );
        if stats.changed_files > 0 && !metrics.is_worthwhile() {
            warn!(
                "Patches are {:.0}% of the changed files (threshold {:.0}%), delta saves little",
                metrics.compression_ratio * 100.0,
                MAX_DELTA_RATIO * 100.0
            );
        }

        Ok(stats)
    }

    /// Payload files (below the payload root) of an extracted package
    fn payload_files(&self, root: &Path) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.payload_root);
        Ok(relative_files(root)?
            .into_iter()
            .filter(|f| f.starts_with(&prefix))
            .collect())
    }

    /// Diff every new payload file in parallel
    ///
    /// Each file is retried independently. All failures are collected and
    /// reported together once every file has been attempted.
    fn diff_all(
        &self,
        format: PatchFormat,
        base_dir: &Path,
        new_dir: &Path,
        files: &[String],
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Vec<(FileOutcome, usize)>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| Error::DeltaError(format!("Failed to create worker pool: {}", e)))?;

        let done = AtomicUsize::new(0);
        let results: Vec<(String, Result<(FileOutcome, usize)>)> = pool.install(|| {
            files
                .par_iter()
                .map(|relative| {
                    let mut attempts = 0;
                    let result = self
                        .retry
                        .run_any(&format!("Diff {}", relative), || {
                            attempts += 1;
                            cancel.check()?;
                            self.diff_file(format, base_dir, new_dir, relative)
                        })
                        .map(|outcome| (outcome, attempts - 1));

                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    progress.report(percent_of(finished as u64, files.len() as u64));
                    (relative.clone(), result)
                })
                .collect()
        });

        let mut outcomes = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (relative, result) in results {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => failures.push(format!("{}: {}", relative, e)),
            }
        }

        if !failures.is_empty() {
            return Err(Error::DeltaError(format!(
                "{} of {} files failed to diff: {}",
                failures.len(),
                files.len(),
                failures.join("; ")
            )));
        }
        Ok(outcomes)
    }

    /// Replace one new payload file with its delta representation
    fn diff_file(
        &self,
        format: PatchFormat,
        base_dir: &Path,
        new_dir: &Path,
        relative: &str,
    ) -> Result<FileOutcome> {
        let base_file = native_path(base_dir, relative);
        let new_file = native_path(new_dir, relative);

        if !base_file.is_file() {
            debug!("{} is new", relative);
            return Ok(FileOutcome::New);
        }
        if fs::metadata(&base_file)?.len() == 0 {
            // Nothing to diff against; shipping the file whole is equivalent
            debug!("{} has an empty base, storing verbatim", relative);
            return Ok(FileOutcome::New);
        }

        let same_marker = sidecar(&new_file, SAME_EXT);
        let shasum_file = sidecar(&new_file, SHASUM_EXT);
        let patch_file = sidecar(&new_file, format.extension());

        let result = (|| -> Result<FileOutcome> {
            let mode = archive::file_mode(&new_file)?;

            if files_equal(&base_file, &new_file)? {
                fs::write(&same_marker, b"")?;
                fs::write(&shasum_file, b"")?;
                archive::set_mode(&same_marker, mode)?;
                fs::remove_file(&new_file)?;
                return Ok(FileOutcome::Same);
            }

            let old = fs::read(&base_file)?;
            let new = fs::read(&new_file)?;
            let patch = format.encode(&old, &new, self.zstd_level)?;

            let file_name = new_file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(relative);
            let record = Shasum::new(crate::hash::sha1(&new).to_uppercase(), file_name, new.len() as u64);

            fs::write(&patch_file, &patch)?;
            fs::write(&shasum_file, record.to_string())?;
            archive::set_mode(&patch_file, mode)?;
            fs::remove_file(&new_file)?;

            debug!("{} patched: {} -> {} bytes", relative, new.len(), patch.len());
            Ok(FileOutcome::Changed {
                new_size: new.len() as u64,
                patch_size: patch.len() as u64,
            })
        })();

        if result.is_err() {
            // Leave the tree as it was so a retry starts clean
            for leftover in [&same_marker, &shasum_file, &patch_file] {
                let _ = fs::remove_file(leftover);
            }
        }
        result
    }
}

/// Reject payload names the applier would read back as delta entries
fn check_payload_names(payload: &[String]) -> Result<()> {
    let reserved: Vec<&str> = payload
        .iter()
        .map(String::as_str)
        .filter(|f| classify_entry(f) != EntryKind::Verbatim)
        .collect();
    if reserved.is_empty() {
        return Ok(());
    }
    Err(Error::DeltaError(format!(
        "Payload file(s) use reserved delta extensions: {}",
        reserved.join(", ")
    )))
}

/// `<path>.<ext>`
fn sidecar(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn partial_path(output: &Path) -> PathBuf {
    sidecar(output, "partial")
}
