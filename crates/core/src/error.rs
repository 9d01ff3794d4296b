//! Error types for logsync
//!
//! This module defines the error taxonomy shared by every layer.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! | Error                        | Meaning                               | Retried |
//! |------------------------------|---------------------------------------|---------|
//! | `NoSuchRecord`               | reader exhausted, nothing to do       | n/a     |
//! | `TransientStoreError`        | I/O against the store failed          | yes     |
//! | `FatalApplyError`            | store rejected the write              | no      |
//! | `RetriesExhausted`           | executor gave up                      | no      |
//! | `PositionRegressionRejected` | checkpoint would move backwards       | no      |

use crate::types::{ImportKey, Position};
use thiserror::Error;

/// Result type alias for import pipeline operations
pub type ImportResult<T> = std::result::Result<T, ImportError>;

/// The reader has no record after its cursor.
///
/// Returned both for an exhausted reader and for a closed one; callers
/// cannot and must not tell the two apart through this error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no record available after the reader cursor")]
pub struct NoSuchRecord;

/// Errors reported by an external store adapter.
///
/// Every store adapter classifies its own failures into one of these two
/// variants; nothing upstream re-classifies them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Retryable failure (connection reset, service unavailable, timeout)
    #[error("transient store error: {0}")]
    Transient(String),

    /// Non-retryable failure (schema mismatch, malformed request)
    #[error("store rejected write: {0}")]
    FatalApply(String),
}

impl StoreError {
    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        StoreError::Transient(msg.into())
    }

    /// Create a fatal apply error
    pub fn fatal(msg: impl Into<String>) -> Self {
        StoreError::FatalApply(msg.into())
    }

    /// Whether the failure may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Errors raised by the import position holder and its backing store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    /// Attempt to move a checkpoint backwards
    #[error("position regression rejected for {key}: stored {stored}, attempted {attempted}")]
    PositionRegressionRejected {
        /// Pair whose checkpoint was targeted
        key: ImportKey,
        /// Currently stored position
        stored: Position,
        /// Rejected lower position
        attempted: Position,
    },

    /// I/O error in the durable checkpoint store
    #[error("checkpoint store I/O error: {0}")]
    Io(String),

    /// Checkpoint file could not be encoded or decoded
    #[error("checkpoint serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by an import job to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    /// Reader exhausted; normal control flow
    #[error(transparent)]
    NoSuchRecord(#[from] NoSuchRecord),

    /// Retryable store failure that escaped the executor
    #[error("transient store error: {0}")]
    TransientStoreError(String),

    /// Store rejected the batch
    #[error("fatal apply error: {0}")]
    FatalApplyError(String),

    /// The executor gave up
    #[error(
        "Couldn't execute operation {operation} for {attempts} attempts with {delay_ms} ms waiting: {last}"
    )]
    RetriesExhausted {
        /// Name of the operation that was retried
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Configured base delay between attempts in milliseconds
        delay_ms: u64,
        /// Description of the last failure or unsatisfied result
        last: String,
    },

    /// Broken ordering invariant; halts the owning pair
    #[error("position regression rejected for {key}: stored {stored}, attempted {attempted}")]
    PositionRegressionRejected {
        /// Pair whose checkpoint was targeted
        key: ImportKey,
        /// Currently stored position
        stored: Position,
        /// Rejected lower position
        attempted: Position,
    },

    /// The durable checkpoint could not be written
    #[error("checkpoint store error: {0}")]
    CheckpointStore(String),
}

impl ImportError {
    /// Whether this error must stop the owning pipeline worker until an
    /// operator intervenes.
    pub fn is_halting(&self) -> bool {
        matches!(self, ImportError::PositionRegressionRejected { .. })
    }
}

impl From<StoreError> for ImportError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transient(msg) => ImportError::TransientStoreError(msg),
            StoreError::FatalApply(msg) => ImportError::FatalApplyError(msg),
        }
    }
}

impl From<CheckpointError> for ImportError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::PositionRegressionRejected {
                key,
                stored,
                attempted,
            } => ImportError::PositionRegressionRejected {
                key,
                stored,
                attempted,
            },
            other => ImportError::CheckpointStore(other.to_string()),
        }
    }
}
