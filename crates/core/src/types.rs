//! Core types for logsync
//!
//! This module defines the foundational types:
//! - Position: Location of a record inside one partition's log
//! - PartitionId: Identifier of an independent log shard
//! - ValueType: Schema tag routing a record to a target collection
//! - LogRecord: Immutable record read from the log
//! - ImportKey: The (value-type, partition) pair that scopes a checkpoint
//! - ImportPosition: Durable checkpoint for one ImportKey

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a record within a partition.
///
/// Positions are strictly increasing in write order and unique within a
/// partition. Valid record positions are non-negative; negative values are
/// reserved for sentinels.
pub type Position = i64;

/// Sentinel meaning "no position": an unset reader cursor, an empty log, or
/// a pair that has never been checkpointed.
pub const NO_POSITION: Position = -1;

/// Identifier of a log partition.
pub type PartitionId = u32;

/// Maximum encoded length of a value-type tag in bytes.
pub const MAX_VALUE_TYPE_LEN: usize = u16::MAX as usize;

/// Tag classifying a record's schema/purpose.
///
/// The value-type selects the target collection in the external store and
/// scopes an independent import cursor per partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueType(String);

impl ValueType {
    /// Create a new value-type tag
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ValueType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ValueType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An immutable record read from a partition's log.
///
/// Records are returned by value. Nothing in the pipeline mutates a record
/// once it has been read, so no defensive copies are taken anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Partition the record belongs to
    pub partition: PartitionId,
    /// Position within the partition (strictly increasing)
    pub position: Position,
    /// Logical entity identifier; may repeat across positions
    pub key: i64,
    /// Schema tag
    pub value_type: ValueType,
    /// Producer timestamp (microseconds since epoch)
    pub timestamp: u64,
    /// Opaque payload
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// Create a new record stamped with the current time.
    pub fn new(
        partition: PartitionId,
        position: Position,
        key: i64,
        value_type: impl Into<ValueType>,
        payload: Vec<u8>,
    ) -> Self {
        LogRecord {
            partition,
            position,
            key,
            value_type: value_type.into(),
            timestamp: now_micros(),
            payload,
        }
    }

    /// Replace the producer timestamp (builder pattern).
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// The (value-type, partition) pair that owns one import cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImportKey {
    /// Value-type of the records imported under this key
    pub value_type: ValueType,
    /// Partition the records are read from
    pub partition: PartitionId,
}

impl ImportKey {
    /// Create a new import key
    pub fn new(value_type: impl Into<ValueType>, partition: PartitionId) -> Self {
        Self {
            value_type: value_type.into(),
            partition,
        }
    }
}

impl fmt::Display for ImportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value_type, self.partition)
    }
}

/// Durable checkpoint for one (value-type, partition) pair.
///
/// `position` is the position of the last record confirmed persisted in the
/// external store. It only ever moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPosition {
    /// Value-type of the checkpointed cursor
    pub value_type: ValueType,
    /// Partition of the checkpointed cursor
    pub partition: PartitionId,
    /// Target collection in the external store
    pub routing_key: String,
    /// Position of the last successfully imported record
    pub position: Position,
    /// Number of times this checkpoint has been advanced
    pub sequence: u64,
    /// Wall-clock time of the last advance
    pub updated_at: DateTime<Utc>,
}

impl ImportPosition {
    /// Create a checkpoint at the given position, stamped now.
    pub fn new(key: &ImportKey, routing_key: impl Into<String>, position: Position) -> Self {
        ImportPosition {
            value_type: key.value_type.clone(),
            partition: key.partition,
            routing_key: routing_key.into(),
            position,
            sequence: 0,
            updated_at: Utc::now(),
        }
    }

    /// The import key this checkpoint belongs to
    pub fn key(&self) -> ImportKey {
        ImportKey::new(self.value_type.clone(), self.partition)
    }
}

/// Current time in microseconds since the Unix epoch.
pub fn now_micros() -> u64 {
    Utc::now().timestamp_micros().max(0) as u64
}
