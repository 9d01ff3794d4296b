//! Error type for the segmented log

use crate::format::SegmentMetaError;
use crate::log::LogConfigError;
use logsync_core::{PartitionId, Position};

/// Errors raised while opening, appending to, or reading a log.
///
/// I/O errors are carried as strings so the error stays `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// Underlying file system failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Rejected configuration
    #[error("invalid log config: {0}")]
    Config(#[from] LogConfigError),

    /// Appended position does not exceed the last one
    #[error("position {attempted} does not follow last position {last}")]
    PositionNotIncreasing {
        /// Last position in the log
        last: Position,
        /// Rejected position
        attempted: Position,
    },

    /// Appended record targets another partition
    #[error("record for partition {record} appended to log of partition {log}")]
    PartitionMismatch {
        /// Partition of the log
        log: PartitionId,
        /// Partition named by the record
        record: PartitionId,
    },

    /// Value-type tag does not fit the frame's length field
    #[error("value type of {0} bytes exceeds the maximum tag length")]
    ValueTypeTooLong(usize),

    /// Segment contents contradict the log's invariants
    #[error("corrupt segment {segment}: {detail}")]
    CorruptSegment {
        /// Segment number
        segment: u64,
        /// What is wrong with it
        detail: String,
    },
}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        LogError::Io(e.to_string())
    }
}

impl From<SegmentMetaError> for LogError {
    fn from(e: SegmentMetaError) -> Self {
        LogError::Io(e.to_string())
    }
}
