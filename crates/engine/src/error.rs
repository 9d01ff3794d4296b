//! Error types for the import engine
//!
//! Job failures are not errors of the engine itself: they travel inside
//! [`ImportOutcome`](crate::job::ImportOutcome) as
//! [`ImportError`](logsync_core::ImportError). The types here cover
//! misuse of the engine's own API.

use logsync_core::{PartitionId, Position, ValueType};
use thiserror::Error;

/// An Import Batch could not be built from the given records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// A batch holds at least one record
    #[error("import batch must not be empty")]
    Empty,

    /// Record of a different value-type than the batch
    #[error("record at position {position} has value-type {found}, batch expects {expected}")]
    ValueTypeMismatch {
        /// Offending record position
        position: Position,
        /// Value-type of the batch
        expected: ValueType,
        /// Value-type of the record
        found: ValueType,
    },

    /// Record read from a different partition than the batch
    #[error("record at position {position} belongs to partition {found}, batch expects {expected}")]
    PartitionMismatch {
        /// Offending record position
        position: Position,
        /// Partition of the batch
        expected: PartitionId,
        /// Partition of the record
        found: PartitionId,
    },

    /// Positions must strictly increase through the batch
    #[error("batch positions not increasing: {previous} followed by {next}")]
    PositionsNotIncreasing {
        /// Earlier position
        previous: Position,
        /// Following position
        next: Position,
    },
}

/// The scheduler could not accept more work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The worker queue is at `max_queue_depth`
    #[error("import worker queue is full")]
    Backpressure,

    /// [`shutdown`](crate::scheduler::ImportScheduler::shutdown) was called
    #[error("import scheduler is shut down")]
    ShutDown,
}

/// Failure to start the import engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Invalid importer configuration
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Checkpoints could not be loaded
    #[error(transparent)]
    Checkpoint(#[from] logsync_core::CheckpointError),

    /// A worker thread could not be started
    #[error("failed to spawn import worker: {0}")]
    Spawn(String),
}
