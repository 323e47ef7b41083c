//! Tracker Configuration
//!
//! All knobs are fixed when a `Tracker` is constructed. There is no
//! environment or file based configuration.

/// Default maximum number of region records per tracker.
pub const DEFAULT_MAX_REGIONS: usize = 4096;

/// Construction-time settings for a `Tracker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Maximum number of records, valid or revoked, the table may hold.
    pub max_regions: usize,
}

impl TrackerConfig {
    /// Default configuration (const-compatible).
    pub const fn new() -> Self {
        Self {
            max_regions: DEFAULT_MAX_REGIONS,
        }
    }

    /// Set the region limit.
    pub const fn with_max_regions(mut self, max_regions: usize) -> Self {
        self.max_regions = max_regions;
        self
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new()
    }
}
