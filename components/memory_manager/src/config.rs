//! Heap configuration.

use thiserror::Error;

use crate::concurrent_gc::IncrementalConfig;

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// `full_gc_threshold` must lie in `(0, 1]`.
    #[error("full_gc_threshold {0} is not in (0, 1]")]
    FullGcThreshold(f64),

    /// `max_old_segments` is set but below `min_old_segments`.
    #[error("max_old_segments {max} is below min_old_segments {min}")]
    OldSegmentBounds {
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The large-object threshold exceeds what a segment can hold.
    #[error("large_object_threshold {threshold} exceeds the segment size {segment_size}")]
    LargeObjectThreshold {
        /// Configured threshold.
        threshold: usize,
        /// Provider segment size.
        segment_size: usize,
    },

    /// Incremental marking cannot make progress with an empty slice.
    #[error("incremental marking needs max_cells_per_slice > 0")]
    EmptySlice,
}

/// Configuration of a [`Heap`](crate::Heap).
///
/// The segment size is not configured here; it is fixed by the storage
/// provider the heap is created with.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Name used in logs and as the segment name prefix
    pub name: String,
    /// Young collections a cell must survive before promotion
    pub promotion_age: u8,
    /// Allocations of at least this many bytes go straight to the old
    /// generation (0 = one eighth of a segment)
    pub large_object_threshold: usize,
    /// Old segments acquired up front and never released
    pub min_old_segments: usize,
    /// Upper bound on old segments (0 = bounded only by the provider)
    pub max_old_segments: usize,
    /// Old-generation occupancy above which a full collection runs
    pub full_gc_threshold: f64,
    /// External bytes credited to cells before a full collection is forced
    pub max_external_bytes: usize,
    /// Incremental marking settings
    pub incremental: IncrementalConfig,
    /// Return fully empty old segments to the provider after a sweep
    pub release_unused_segments: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            name: "heap".to_string(),
            promotion_age: 1,
            large_object_threshold: 0,
            min_old_segments: 1,
            max_old_segments: 0,
            full_gc_threshold: 0.75,
            max_external_bytes: 64 * 1024 * 1024,
            incremental: IncrementalConfig::default(),
            release_unused_segments: true,
        }
    }
}

impl GcConfig {
    /// Sets the heap name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the promotion age.
    pub fn with_promotion_age(mut self, age: u8) -> Self {
        self.promotion_age = age;
        self
    }

    /// Sets the large-object threshold in bytes.
    pub fn with_large_object_threshold(mut self, bytes: usize) -> Self {
        self.large_object_threshold = bytes;
        self
    }

    /// Sets the old segment bounds.
    pub fn with_old_segments(mut self, min: usize, max: usize) -> Self {
        self.min_old_segments = min;
        self.max_old_segments = max;
        self
    }

    /// Sets the full-collection occupancy threshold.
    pub fn with_full_gc_threshold(mut self, threshold: f64) -> Self {
        self.full_gc_threshold = threshold;
        self
    }

    /// Sets the external memory ceiling.
    pub fn with_max_external_bytes(mut self, bytes: usize) -> Self {
        self.max_external_bytes = bytes;
        self
    }

    /// Replaces the incremental marking settings.
    pub fn with_incremental(mut self, incremental: IncrementalConfig) -> Self {
        self.incremental = incremental;
        self
    }

    /// Chooses whether empty old segments are returned after a sweep.
    pub fn with_release_unused_segments(mut self, release: bool) -> Self {
        self.release_unused_segments = release;
        self
    }

    /// Effective large-object threshold for `segment_size`.
    pub fn large_object_threshold_for(&self, segment_size: usize) -> usize {
        if self.large_object_threshold == 0 {
            segment_size / 8
        } else {
            self.large_object_threshold
        }
    }

    /// Checks the configuration against the provider's segment size.
    pub fn validate(&self, segment_size: usize) -> Result<(), ConfigError> {
        if !(self.full_gc_threshold > 0.0 && self.full_gc_threshold <= 1.0) {
            return Err(ConfigError::FullGcThreshold(self.full_gc_threshold));
        }
        if self.max_old_segments != 0 && self.max_old_segments < self.min_old_segments {
            return Err(ConfigError::OldSegmentBounds {
                min: self.min_old_segments,
                max: self.max_old_segments,
            });
        }
        let threshold = self.large_object_threshold_for(segment_size);
        if threshold > segment_size {
            return Err(ConfigError::LargeObjectThreshold {
                threshold,
                segment_size,
            });
        }
        if self.incremental.enabled && self.incremental.max_cells_per_slice == 0 {
            return Err(ConfigError::EmptySlice);
        }
        Ok(())
    }
}
