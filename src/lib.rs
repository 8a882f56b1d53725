// src/lib.rs

//! Updraft self-update engine
//!
//! Decides whether an installed application should move to a newer (or
//! explicitly requested older) release, fetches the smallest set of
//! artifacts needed to get there, reconstructs the target package from
//! binary deltas when possible, and promotes the verified result into the
//! local package store atomically.
//!
//! # Architecture
//!
//! - Asset feed: release metadata published per channel (`asset`)
//! - Decision engine: pure function from installed state + feed to a plan (`update::plan`)
//! - Delta engine: per-file binary patches inside a zip container (`delta`)
//! - Pipeline: delta-first acquisition with full-package fallback (`update::pipeline`)
//! - Lock: at most one update operation per application (`update::lock`)
//!
//! Everything is blocking. Parallel work (downloads, per-file diffing and
//! patching) runs on bounded rayon pools sized by `UpdateConfig`.

pub mod archive;
pub mod asset;
pub mod config;
pub mod delta;
mod error;
pub mod filesystem;
pub mod hash;
pub mod progress;
pub mod retry;
pub mod source;
pub mod update;
pub mod version;

pub use asset::{Asset, AssetFeed, AssetKind};
pub use config::{UpdateConfig, UpdateOptions};
pub use delta::{ApplyStats, DeltaApplier, DeltaBuilder, DeltaStats, PatchFormat};
pub use error::{Error, Result};
pub use hash::{Hash, HashAlgorithm, Hasher};
pub use progress::{
    CallbackProgress, CancelToken, LogProgress, ProgressSink, SilentProgress,
};
pub use retry::{Backoff, RetryPolicy};
pub use source::{FileSource, HttpSource, UpdateSource};
pub use update::{
    FileUpdateLock, InMemoryUpdateLock, InstalledApp, PackageStore, UpdateInfo, UpdateLock,
    UpdateManager,
};
