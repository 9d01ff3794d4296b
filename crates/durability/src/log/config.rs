//! Log configuration.

use super::DurabilityMode;

/// Segmented log configuration parameters.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Maximum segment size in bytes (default: 64MB).
    ///
    /// When appending a record would push a non-empty segment past this
    /// size, the writer seals it and starts a new segment.
    pub segment_size: u64,

    /// Records between sparse index entries (default: 64).
    ///
    /// A seek scans at most this many records after the binary search.
    pub index_interval: usize,

    /// When appended records are fsynced.
    pub durability: DurabilityMode,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            segment_size: 64 * 1024 * 1024, // 64MB
            index_interval: 64,
            durability: DurabilityMode::default(),
        }
    }
}

impl LogConfig {
    /// Create a new log configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set segment size (builder pattern).
    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Set sparse index interval (builder pattern).
    pub fn with_index_interval(mut self, interval: usize) -> Self {
        self.index_interval = interval;
        self
    }

    /// Set durability mode (builder pattern).
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), LogConfigError> {
        if self.segment_size < 1024 {
            return Err(LogConfigError::SegmentSizeTooSmall);
        }
        if self.index_interval == 0 {
            return Err(LogConfigError::ZeroIndexInterval);
        }
        Ok(())
    }

    /// Create a configuration optimized for testing (tiny segments, dense
    /// index).
    pub fn for_testing() -> Self {
        LogConfig {
            segment_size: 1024,
            index_interval: 4,
            durability: DurabilityMode::default(),
        }
    }
}

/// Log configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogConfigError {
    /// Segment size is too small (minimum 1KB).
    #[error("Segment size must be at least 1KB")]
    SegmentSizeTooSmall,

    /// Index interval must be positive.
    #[error("Index interval must be at least 1")]
    ZeroIndexInterval,
}
