//! Import Batch: an ordered slice of one value-type's records.

use crate::error::BatchError;
use logsync_core::{ImportKey, LogRecord, PartitionId, Position, ValueType};

/// Terminal state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Not yet processed by a job
    Pending,
    /// Persisted and checkpointed
    Finished,
    /// Persisting or checkpointing failed; the checkpoint did not move
    Failed,
}

/// Consecutive records of one value-type from one partition, in position
/// order, bound for one target collection.
///
/// The records are fixed at construction. The state flag is the only part
/// that changes, and only the owning job changes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportBatch {
    key: ImportKey,
    routing_key: String,
    records: Vec<LogRecord>,
    state: BatchState,
}

impl ImportBatch {
    /// Build a batch, checking that `records` is non-empty, matches `key`
    /// and has strictly increasing positions.
    pub fn new(
        key: ImportKey,
        routing_key: impl Into<String>,
        records: Vec<LogRecord>,
    ) -> Result<Self, BatchError> {
        if records.is_empty() {
            return Err(BatchError::Empty);
        }
        let mut previous: Option<Position> = None;
        for record in &records {
            if record.value_type != key.value_type {
                return Err(BatchError::ValueTypeMismatch {
                    position: record.position,
                    expected: key.value_type.clone(),
                    found: record.value_type.clone(),
                });
            }
            if record.partition != key.partition {
                return Err(BatchError::PartitionMismatch {
                    position: record.position,
                    expected: key.partition,
                    found: record.partition,
                });
            }
            if let Some(prev) = previous {
                if record.position <= prev {
                    return Err(BatchError::PositionsNotIncreasing {
                        previous: prev,
                        next: record.position,
                    });
                }
            }
            previous = Some(record.position);
        }
        Ok(Self::from_scan(key, routing_key.into(), records))
    }

    /// Records produced by a reader already satisfy every check in `new`.
    pub(crate) fn from_scan(key: ImportKey, routing_key: String, records: Vec<LogRecord>) -> Self {
        ImportBatch {
            key,
            routing_key,
            records,
            state: BatchState::Pending,
        }
    }

    /// The (value-type, partition) pair this batch advances
    pub fn key(&self) -> &ImportKey {
        &self.key
    }

    /// Value-type shared by every record
    pub fn value_type(&self) -> &ValueType {
        &self.key.value_type
    }

    /// Partition the records were read from
    pub fn partition(&self) -> PartitionId {
        self.key.partition
    }

    /// Target collection in the external store
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Records in position order
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false for a constructed batch
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Position of the first record
    pub fn first_position(&self) -> Position {
        self.records.first().map_or(logsync_core::NO_POSITION, |r| r.position)
    }

    /// Position the checkpoint moves to once this batch is persisted
    pub fn last_position(&self) -> Position {
        self.records.last().map_or(logsync_core::NO_POSITION, |r| r.position)
    }

    /// Producer timestamp of the last record
    pub fn last_timestamp(&self) -> u64 {
        self.records.last().map_or(0, |r| r.timestamp)
    }

    /// Current state
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Whether the batch was persisted and checkpointed
    pub fn is_finished(&self) -> bool {
        self.state == BatchState::Finished
    }

    /// Whether the batch failed
    pub fn is_failed(&self) -> bool {
        self.state == BatchState::Failed
    }

    pub(crate) fn finished(&mut self) {
        self.state = BatchState::Finished;
    }

    pub(crate) fn failed(&mut self) {
        self.state = BatchState::Failed;
    }
}
