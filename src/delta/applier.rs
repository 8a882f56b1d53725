// src/delta/applier.rs

//! Delta applier to turn an extracted base package into the next release
//!
//! The working directory holds an extracted full package. Applying a delta
//! patches, keeps or adds every file the delta names and then deletes
//! whatever the delta did not name, so after a successful apply the
//! directory contains exactly the new release.

use super::ApplyStats;
use super::format::{EntryKind, PatchFormat, SHASUM_EXT, Shasum, classify_entry};
use crate::archive::{self, extract_archive};
use crate::config::UpdateConfig;
use crate::error::{Error, Result};
use crate::filesystem::{native_path, relative_files, write_file_atomic};
use crate::progress::{CancelToken, ProgressSink, RangeProgress, percent_of};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tracing::{debug, info};

/// Progress share for extracting the delta package
const EXTRACT_PROGRESS: u8 = 20;

/// Progress share ending the per-file work; the remainder is cleanup
const PATCH_PROGRESS: u8 = 90;

/// One step of applying a delta
#[derive(Debug)]
enum Action {
    /// Patch `target` in place using the patch at `patch`
    Patch {
        target: String,
        patch: String,
        format: PatchFormat,
    },
    /// Keep `target` as it is
    Keep { target: String },
    /// Copy `entry` from the delta over the working copy
    Copy { entry: String },
}

impl Action {
    fn target(&self) -> &str {
        match self {
            Action::Patch { target, .. } | Action::Keep { target } => target,
            Action::Copy { entry } => entry,
        }
    }
}

/// Applies delta packages to an extracted base package
pub struct DeltaApplier {
    workers: usize,
    payload_root: String,
}

impl DeltaApplier {
    pub fn new(config: &UpdateConfig) -> Self {
        Self {
            workers: config.worker_count(),
            payload_root: config.payload_root.trim_matches('/').to_string(),
        }
    }

    /// Apply deltas in order, each on top of the result of the previous one
    pub fn apply_chain(
        &self,
        work_dir: &Path,
        deltas: &[PathBuf],
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ApplyStats> {
        let mut total = ApplyStats::default();
        let count = deltas.len().max(1) as u64;

        for (index, delta) in deltas.iter().enumerate() {
            cancel.check()?;
            let start = percent_of(index as u64, count);
            let end = percent_of(index as u64 + 1, count);
            let step = RangeProgress::new(progress, start, end);
            total.merge(self.apply(work_dir, delta, &step, cancel)?);
        }

        progress.report(100);
        Ok(total)
    }

    /// Apply one delta package to `work_dir`
    ///
    /// # Errors
    /// - `PatchTargetMissing` if the delta patches or keeps a file the
    ///   working directory does not have (checked before anything changes)
    /// - `PatchCorrupt` if a patch cannot be decoded or its output does not
    ///   match the recorded size and SHA-1
    pub fn apply(
        &self,
        work_dir: &Path,
        delta: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ApplyStats> {
        info!("Applying delta {} to {}", delta.display(), work_dir.display());

        let scratch = TempDir::new()
            .map_err(|e| Error::IoError(format!("Failed to create scratch directory: {}", e)))?;
        extract_archive(delta, scratch.path(), cancel)?;
        progress.report(EXTRACT_PROGRESS);

        let actions = self.plan(scratch.path())?;

        for action in &actions {
            if let Action::Patch { target, .. } | Action::Keep { target } = action
                && !native_path(work_dir, target).is_file()
            {
                return Err(Error::PatchTargetMissing(target.clone()));
            }
        }

        let kept: HashSet<&str> = actions.iter().map(Action::target).collect();
        let mut stats = self.execute(
            work_dir,
            scratch.path(),
            &actions,
            &RangeProgress::new(progress, EXTRACT_PROGRESS, PATCH_PROGRESS),
            cancel,
        )?;

        for relative in relative_files(work_dir)? {
            if !kept.contains(relative.as_str()) {
                debug!("Removing {}", relative);
                fs::remove_file(native_path(work_dir, &relative)).map_err(|e| {
                    Error::IoError(format!("Failed to remove {}: {}", relative, e))
                })?;
                stats.deleted += 1;
            }
        }
        progress.report(100);

        info!(
            "Delta applied: {} patched, {} unchanged, {} copied, {} removed",
            stats.patched, stats.unchanged, stats.copied, stats.deleted
        );
        Ok(stats)
    }

    /// Turn the extracted delta into a list of actions
    fn plan(&self, delta_dir: &Path) -> Result<Vec<Action>> {
        let prefix = format!("{}/", self.payload_root);
        let mut actions = Vec::new();

        for entry in relative_files(delta_dir)? {
            if !entry.starts_with(&prefix) {
                actions.push(Action::Copy { entry });
                continue;
            }

            match classify_entry(&entry) {
                EntryKind::Sidecar => {}
                EntryKind::Unchanged(target) => {
                    let size = fs::metadata(native_path(delta_dir, &entry))?.len();
                    if size != 0 {
                        return Err(Error::PatchCorrupt(format!(
                            "{}: unsupported non-empty .diff patch",
                            entry
                        )));
                    }
                    actions.push(Action::Keep {
                        target: target.to_string(),
                    });
                }
                EntryKind::Patch(target, format) => actions.push(Action::Patch {
                    target: target.to_string(),
                    patch: entry.clone(),
                    format,
                }),
                EntryKind::Verbatim => actions.push(Action::Copy { entry }),
            }
        }

        Ok(actions)
    }

    fn execute(
        &self,
        work_dir: &Path,
        delta_dir: &Path,
        actions: &[Action],
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ApplyStats> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| Error::DeltaError(format!("Failed to create worker pool: {}", e)))?;

        let done = AtomicUsize::new(0);
        pool.install(|| {
            actions.par_iter().try_for_each(|action| {
                cancel.check()?;
                match action {
                    Action::Patch { target, patch, format } => {
                        apply_patch(work_dir, delta_dir, target, patch, *format)?
                    }
                    Action::Keep { .. } => {}
                    Action::Copy { entry } => copy_entry(work_dir, delta_dir, entry)?,
                }
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                progress.report(percent_of(finished as u64, actions.len() as u64));
                Ok::<(), Error>(())
            })
        })?;

        let mut stats = ApplyStats::default();
        for action in actions {
            match action {
                Action::Patch { .. } => stats.patched += 1,
                Action::Keep { .. } => stats.unchanged += 1,
                Action::Copy { .. } => stats.copied += 1,
            }
        }
        Ok(stats)
    }
}

/// Patch one file and swap the result into place
fn apply_patch(
    work_dir: &Path,
    delta_dir: &Path,
    target: &str,
    patch: &str,
    format: PatchFormat,
) -> Result<()> {
    let target_path = native_path(work_dir, target);
    let patch_path = native_path(delta_dir, patch);

    let old = fs::read(&target_path)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", target, e)))?;
    let patch_bytes = fs::read(&patch_path)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", patch, e)))?;

    let new = format
        .decode(&old, &patch_bytes)
        .map_err(|e| match e {
            Error::PatchCorrupt(msg) => Error::PatchCorrupt(format!("{}: {}", target, msg)),
            other => other,
        })?;

    let shasum_path = native_path(delta_dir, &format!("{}.{}", target, SHASUM_EXT));
    if shasum_path.is_file() {
        let record = fs::read_to_string(&shasum_path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", shasum_path.display(), e)))?;
        if let Some(expected) = Shasum::parse(&record)? {
            expected.verify(&new)?;
        }
    }

    write_file_atomic(&target_path, &new)?;
    archive::set_mode(&target_path, archive::file_mode(&patch_path)?)?;
    debug!("Patched {} ({} bytes)", target, new.len());
    Ok(())
}

/// Copy a verbatim delta entry over the working copy
fn copy_entry(work_dir: &Path, delta_dir: &Path, entry: &str) -> Result<()> {
    let source = native_path(delta_dir, entry);
    let dest = native_path(work_dir, entry);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&source, &dest)
        .map_err(|e| Error::IoError(format!("Failed to copy {}: {}", entry, e)))?;
    Ok(())
}
