//! Record scanner: turns one partition's log into Import Batches.
//!
//! A scanner owns a private reader over its partition and keeps one logical
//! cursor per registered value-type. Each scan starts right after the
//! pair's checkpoint and collects that value-type's records, skipping the
//! others, until the batch is full or the log runs out.

use crate::batch::ImportBatch;
use logsync_core::{ImportKey, LogReader, NoSuchRecord, PartitionId, Position, ValueType};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Default maximum number of records per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// What the last scan of a value-type learned.
///
/// While the checkpoint still equals `checkpoint`, no record of the
/// value-type lies in `(checkpoint, scanned_to]`, so the next scan may
/// start after `scanned_to` instead of re-reading that range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScanCursor {
    checkpoint: Position,
    scanned_to: Position,
}

#[derive(Debug)]
struct Registration {
    routing_key: String,
    cursor: Option<ScanCursor>,
}

/// Produces Import Batches for every value-type registered on one partition.
pub struct RecordScanner {
    reader: Box<dyn LogReader>,
    max_batch_size: usize,
    value_types: BTreeMap<ValueType, Registration>,
}

impl RecordScanner {
    /// Create a scanner over `reader`.
    ///
    /// A `max_batch_size` of zero is treated as one.
    pub fn new(reader: Box<dyn LogReader>, max_batch_size: usize) -> Self {
        RecordScanner {
            reader,
            max_batch_size: max_batch_size.max(1),
            value_types: BTreeMap::new(),
        }
    }

    /// Import `value_type` into the `routing_key` collection.
    ///
    /// Registering a value-type again replaces its routing key.
    pub fn register(&mut self, value_type: impl Into<ValueType>, routing_key: impl Into<String>) {
        self.value_types.insert(
            value_type.into(),
            Registration {
                routing_key: routing_key.into(),
                cursor: None,
            },
        );
    }

    /// Register a value-type (builder pattern).
    pub fn with_value_type(
        mut self,
        value_type: impl Into<ValueType>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.register(value_type, routing_key);
        self
    }

    /// Partition of the underlying reader
    pub fn partition(&self) -> PartitionId {
        self.reader.partition()
    }

    /// Registered value-types, in order
    pub fn value_types(&self) -> impl Iterator<Item = &ValueType> {
        self.value_types.keys()
    }

    /// Import keys of every registered value-type
    pub fn keys(&self) -> Vec<ImportKey> {
        let partition = self.partition();
        self.value_types
            .keys()
            .map(|vt| ImportKey::new(vt.clone(), partition))
            .collect()
    }

    /// Routing key of a registered value-type
    pub fn routing_key(&self, value_type: &ValueType) -> Option<&str> {
        self.value_types.get(value_type).map(|r| r.routing_key.as_str())
    }

    /// Maximum number of records per batch
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Build the next batch of `value_type` after `checkpoint`.
    ///
    /// # Errors
    ///
    /// [`NoSuchRecord`] when there is nothing to import this cycle, which
    /// includes an unregistered value-type.
    pub fn scan(
        &mut self,
        value_type: &ValueType,
        checkpoint: Position,
    ) -> Result<ImportBatch, NoSuchRecord> {
        let partition = self.reader.partition();
        let registration = self.value_types.get_mut(value_type).ok_or(NoSuchRecord)?;

        let start = match registration.cursor {
            Some(cursor) if cursor.checkpoint == checkpoint => cursor.scanned_to.max(checkpoint),
            _ => checkpoint,
        };
        trace!(
            target: "logsync::scanner",
            partition,
            value_type = %value_type,
            checkpoint,
            start,
            "Scanning"
        );

        if !self.reader.seek_to_next_event(start) {
            return Err(NoSuchRecord);
        }

        let mut records = Vec::new();
        while records.len() < self.max_batch_size && self.reader.has_next() {
            let record = self.reader.next()?;
            if &record.value_type == value_type {
                records.push(record);
            }
        }

        let scanned_to = self.reader.position().max(start);
        let last = records.last().map(|r| r.position);
        registration.cursor = Some(ScanCursor {
            checkpoint: last.unwrap_or(checkpoint),
            scanned_to,
        });

        if records.is_empty() {
            return Err(NoSuchRecord);
        }
        debug!(
            target: "logsync::scanner",
            partition,
            value_type = %value_type,
            records = records.len(),
            first = records[0].position,
            last = last.unwrap_or(checkpoint),
            "Built import batch"
        );
        Ok(ImportBatch::from_scan(
            ImportKey::new(value_type.clone(), partition),
            registration.routing_key.clone(),
            records,
        ))
    }

    /// Release the reader; every later scan finds nothing.
    pub fn close(&mut self) {
        self.reader.close();
    }
}

impl std::fmt::Debug for RecordScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordScanner")
            .field("partition", &self.reader.partition())
            .field("max_batch_size", &self.max_batch_size)
            .field("value_types", &self.value_types.keys().collect::<Vec<_>>())
            .finish()
    }
}
