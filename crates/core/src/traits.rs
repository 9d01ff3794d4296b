//! Core traits for the log, the store and checkpoint persistence
//!
//! These traits are the seams of the pipeline. The import engine only talks
//! to a log through [`LogReader`], to the external store through
//! [`StoreSink`], and to durable checkpoint storage through
//! [`PositionStore`], so any log/store pair satisfying them gets the same
//! ordering and checkpointing guarantees.

use crate::error::{CheckpointError, NoSuchRecord, StoreError};
use crate::task::{TaskHandle, TaskSpec, TaskStatus};
use crate::types::{ImportPosition, LogRecord, PartitionId, Position};

/// Cursor over one partition's append-only log.
///
/// Each reader owns its cursor. Readers never mutate shared log state, so
/// any number of them may exist over the same partition.
///
/// Once [`close`](LogReader::close) has been called the reader is inert:
/// `has_next` returns false and `next`/`peek_next` return [`NoSuchRecord`].
/// There is no way to reopen a closed reader; construct a new one instead.
pub trait LogReader: Send {
    /// Partition this reader is bound to
    fn partition(&self) -> PartitionId;

    /// Whether a record exists strictly after the cursor.
    ///
    /// Never fails; read errors are reported as "no next record".
    fn has_next(&mut self) -> bool;

    /// Return the next record and advance the cursor to its position.
    ///
    /// # Errors
    ///
    /// Returns [`NoSuchRecord`] if `has_next` would return false.
    fn next(&mut self) -> Result<LogRecord, NoSuchRecord>;

    /// Return the next record without advancing the cursor.
    ///
    /// Repeated calls return the same record until `next` is called.
    ///
    /// # Errors
    ///
    /// Returns [`NoSuchRecord`] if `has_next` would return false.
    fn peek_next(&mut self) -> Result<LogRecord, NoSuchRecord>;

    /// Position the cursor so that `next` returns the first record with
    /// position >= `position`.
    fn seek(&mut self, position: Position);

    /// Position the cursor before the first record of the log.
    fn seek_to_first_event(&mut self);

    /// Position the cursor after the last record.
    ///
    /// Returns the position of the last record, or a negative value if the
    /// log is empty.
    fn seek_to_end(&mut self) -> Position;

    /// Position the cursor just after the record at exactly `position`.
    ///
    /// A negative `position` seeks to the first record. Returns whether an
    /// anchor record at or after `position` was found, independent of
    /// whether further records follow it.
    fn seek_to_next_event(&mut self, position: Position) -> bool;

    /// Position of the record the cursor currently rests on, or a negative
    /// value if the cursor is unset or the reader is closed.
    fn position(&self) -> Position;

    /// Release resources; the reader becomes permanently inert.
    fn close(&mut self);
}

/// Capability interface to the external queryable store.
///
/// `bulk_apply` MUST be idempotent (upsert by record key). The pipeline
/// advances its checkpoint strictly after a successful apply, so a crash in
/// between re-delivers an already-applied batch on restart.
pub trait StoreSink: Send + Sync {
    /// Apply all records to `collection` as one unit.
    ///
    /// # Errors
    ///
    /// Fails as a whole if any record fails; no partial application may be
    /// reported as success.
    fn bulk_apply(&self, collection: &str, records: &[LogRecord]) -> Result<(), StoreError>;

    /// Number of documents currently held by `collection`.
    fn count(&self, collection: &str) -> Result<u64, StoreError>;

    /// Submit a long-running task.
    fn submit_long_task(&self, spec: &TaskSpec) -> Result<TaskHandle, StoreError>;

    /// Poll a submitted task.
    ///
    /// Returns `Ok(None)` if the store no longer knows the task.
    fn poll_task(&self, handle: &TaskHandle) -> Result<Option<TaskStatus>, StoreError>;

    /// Remove a finished task's record from the store.
    ///
    /// Deleting a task the store no longer knows is not an error.
    fn delete_task(&self, handle: &TaskHandle) -> Result<(), StoreError>;
}

/// Durable storage for import checkpoints.
///
/// Writes must be durable when `store` returns; the position holder relies
/// on this being the sole resumability anchor.
pub trait PositionStore: Send + Sync {
    /// Load every stored checkpoint.
    fn load_all(&self) -> Result<Vec<ImportPosition>, CheckpointError>;

    /// Durably store one checkpoint, replacing any previous value for the
    /// same (value-type, partition).
    fn store(&self, position: &ImportPosition) -> Result<(), CheckpointError>;
}
