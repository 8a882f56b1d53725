// src/delta/metrics.rs

//! Delta build and apply statistics
//!
//! Tracks how each payload file was handled and how much bandwidth the
//! delta saves compared to shipping the changed files whole.

/// Patches above this fraction of the file size save too little to matter
pub const MAX_DELTA_RATIO: f64 = 0.9;

/// Size comparison between changed files and their patches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaMetrics {
    pub new_size: u64,
    pub delta_size: u64,
    pub compression_ratio: f64,
    pub bandwidth_saved: i64,
}

impl DeltaMetrics {
    /// Calculate metrics from sizes
    pub fn new(new_size: u64, delta_size: u64) -> Self {
        let compression_ratio = if new_size > 0 {
            delta_size as f64 / new_size as f64
        } else {
            1.0
        };

        Self {
            new_size,
            delta_size,
            compression_ratio,
            bandwidth_saved: new_size as i64 - delta_size as i64,
        }
    }

    /// Check if the patches are meaningfully smaller than the files
    pub fn is_worthwhile(&self) -> bool {
        self.compression_ratio < MAX_DELTA_RATIO
    }

    /// Get percentage of bandwidth saved
    pub fn savings_percentage(&self) -> f64 {
        if self.new_size > 0 {
            (self.bandwidth_saved as f64 / self.new_size as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Outcome of building one delta package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    /// Payload files absent from the base, stored verbatim
    pub new_files: usize,
    /// Payload files identical to the base
    pub same_files: usize,
    /// Payload files replaced by a patch
    pub changed_files: usize,
    /// Base payload files with no counterpart in the new release
    pub removed_files: usize,
    /// Payload files examined
    pub processed: usize,
    /// Per-file attempts that failed and were retried
    pub retries: usize,
    /// Total size of the changed files
    pub changed_bytes: u64,
    /// Total size of their patches
    pub patch_bytes: u64,
}

impl DeltaStats {
    pub fn metrics(&self) -> DeltaMetrics {
        DeltaMetrics::new(self.changed_bytes, self.patch_bytes)
    }
}

/// Outcome of applying one or more delta packages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub patched: usize,
    pub unchanged: usize,
    /// Files copied verbatim from the delta (new payload and metadata)
    pub copied: usize,
    pub deleted: usize,
}

impl ApplyStats {
    pub fn merge(&mut self, other: ApplyStats) {
        self.patched += other.patched;
        self.unchanged += other.unchanged;
        self.copied += other.copied;
        self.deleted += other.deleted;
    }
}
