// src/delta/mod.rs

//! Delta packages for efficient application updates
//!
//! A delta package turns one full release into the next. It is a zip
//! container with the same layout as a full package, except that every
//! payload file that also existed in the base release is replaced by a
//! per-file binary patch or an "unchanged" marker.
//!
//! # Architecture
//!
//! - **DeltaBuilder**: diffs two full packages into a delta package
//! - **DeltaApplier**: applies delta packages to an extracted base package
//! - **PatchFormat**: legacy (bsdiff) or modern (zstd) per-file patches
//! - **DeltaStats / DeltaMetrics**: what a build did and how much it saved
//!
//! # Modern patch format
//!
//! Modern patches use zstd with the base file as a prefix dictionary:
//! ```text
//! patch = zstd_compress(new_content, dictionary=old_content)
//! ```
//!
//! For similar files (updated binaries, resources) this is a fraction of
//! the file size. Builds without the `zstd-patch` feature fall back to the
//! legacy format for the whole delta.

mod applier;
pub mod format;
mod generator;
mod metrics;

pub use applier::DeltaApplier;
pub use format::{PatchFormat, Shasum};
pub use generator::DeltaBuilder;
pub use metrics::{ApplyStats, DeltaMetrics, DeltaStats, MAX_DELTA_RATIO};
