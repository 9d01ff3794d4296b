//! Log writer with durability mode support.
//!
//! The writer appends record frames to the active segment, rotates segments
//! when they fill up, and publishes every appended record to the shared
//! segment table once its bytes are written (and, in `Always` mode, synced).

use super::table::{ActiveSegment, SealedSegment};
use super::{DurabilityMode, LogShared};
use crate::error::LogError;
use crate::format::{encode_record, LogSegment, SEGMENT_HEADER_SIZE};
use logsync_core::{LogRecord, Position, MAX_VALUE_TYPE_LEN, NO_POSITION};
use std::mem;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Cumulative log operation counters.
///
/// These counters accumulate over the lifetime of the writer and are never
/// reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogCounters {
    /// Total records appended
    pub appends: u64,
    /// Total sync/fsync calls
    pub sync_calls: u64,
    /// Total bytes written to segments
    pub bytes_written: u64,
    /// Total nanoseconds spent in sync/fsync calls
    pub sync_nanos: u64,
    /// Total segment rotations
    pub rotations: u64,
}

/// Single writer of one partition's log.
pub(crate) struct LogWriter {
    shared: Arc<LogShared>,
    segment: LogSegment,
    log_uuid: [u8; 16],
    last_position: Position,
    last_sync_time: Instant,
    has_unsynced_data: bool,
    counters: LogCounters,
}

impl LogWriter {
    pub fn new(
        shared: Arc<LogShared>,
        segment: LogSegment,
        log_uuid: [u8; 16],
        last_position: Position,
    ) -> Self {
        LogWriter {
            shared,
            segment,
            log_uuid,
            last_position,
            last_sync_time: Instant::now(),
            has_unsynced_data: false,
            counters: LogCounters::default(),
        }
    }

    pub fn last_position(&self) -> Position {
        self.last_position
    }

    /// Append a record at its own position.
    ///
    /// The position must be strictly greater than the last appended one and
    /// the record must belong to this log's partition.
    pub fn append(&mut self, record: &LogRecord) -> Result<Position, LogError> {
        if record.partition != self.shared.partition {
            return Err(LogError::PartitionMismatch {
                log: self.shared.partition,
                record: record.partition,
            });
        }
        if record.position <= self.last_position || record.position < 0 {
            return Err(LogError::PositionNotIncreasing {
                last: self.last_position,
                attempted: record.position,
            });
        }
        let vt_len = record.value_type.as_str().len();
        if vt_len > MAX_VALUE_TYPE_LEN {
            return Err(LogError::ValueTypeTooLong(vt_len));
        }

        let frame = encode_record(record);

        // Rotate before writing if a non-empty segment would overflow
        let has_records = self.segment.size() > SEGMENT_HEADER_SIZE as u64;
        if has_records && self.segment.size() + frame.len() as u64 > self.shared.config.segment_size
        {
            self.rotate_segment()?;
        }

        let offset = self.segment.size();
        if let Err(e) = self.segment.write(&frame) {
            // Drop whatever part of the frame reached the file
            if let Err(te) = self.segment.truncate(offset) {
                warn!(target: "logsync::log", error = %te, "Failed to truncate after failed append");
            }
            return Err(e.into());
        }

        self.has_unsynced_data = true;
        if let Err(e) = self.maybe_sync() {
            // Unpublished and unsynced: a retry of this position must not
            // find the frame still in the file
            if let Err(te) = self.segment.truncate(offset) {
                warn!(target: "logsync::log", error = %te, "Failed to truncate after failed sync");
            }
            warn!(
                target: "logsync::log",
                partition = self.shared.partition,
                position = record.position,
                error = %e,
                "Append not synced; record dropped"
            );
            return Err(e);
        }
        self.counters.appends += 1;
        self.counters.bytes_written += frame.len() as u64;

        {
            let mut table = self.shared.table.write();
            table.active.meta.track_record(record.position, record.timestamp);
            table.active.index.track(record.position, offset);
            table.active.end_offset = self.segment.size();
        }
        self.last_position = record.position;

        Ok(record.position)
    }

    /// Append a record at the next position (last + 1, or 1 for an empty log).
    pub fn append_next(
        &mut self,
        key: i64,
        value_type: &str,
        payload: Vec<u8>,
    ) -> Result<Position, LogError> {
        let position = if self.last_position == NO_POSITION {
            1
        } else {
            self.last_position + 1
        };
        let record = LogRecord::new(self.shared.partition, position, key, value_type, payload);
        self.append(&record)
    }

    fn maybe_sync(&mut self) -> Result<(), LogError> {
        if self.shared.config.durability.requires_immediate_fsync() {
            self.sync_now()?;
        }
        // Standard mode: sync_if_overdue() is called by the log's owner
        Ok(())
    }

    fn sync_now(&mut self) -> Result<(), LogError> {
        let start = Instant::now();
        self.segment.sync()?;
        self.counters.sync_calls += 1;
        self.counters.sync_nanos += start.elapsed().as_nanos() as u64;
        self.last_sync_time = Instant::now();
        self.has_unsynced_data = false;
        Ok(())
    }

    /// Seal the active segment and start the next one.
    fn rotate_segment(&mut self) -> Result<(), LogError> {
        self.segment.close()?;

        let next_number = self.segment.segment_number() + 1;
        let next = LogSegment::create(
            &self.shared.dir,
            next_number,
            self.shared.partition,
            self.log_uuid,
        )?;
        let sealed_number = self.segment.segment_number();
        self.segment = next;
        self.has_unsynced_data = false;
        self.last_sync_time = Instant::now();
        self.counters.rotations += 1;

        let sealed_meta = {
            let mut table = self.shared.table.write();
            let interval = self.shared.config.index_interval;
            let old = mem::replace(&mut table.active, ActiveSegment::empty(next_number, interval));
            let meta = old.meta.clone();
            table
                .sealed
                .push(Arc::new(SealedSegment::with_index(old.meta, old.end_offset, old.index)));
            meta
        };

        if let Err(e) = sealed_meta.write_to_file(&self.shared.dir) {
            warn!(
                target: "logsync::log",
                segment = sealed_number,
                error = %e,
                "Failed to write segment meta; it will be rebuilt on open"
            );
        }

        Ok(())
    }

    /// Force any written data to disk.
    pub fn flush(&mut self) -> Result<(), LogError> {
        self.sync_now()
    }

    /// Sync if the Standard interval has elapsed and there is unsynced data.
    ///
    /// Returns `true` if a sync was performed.
    pub fn sync_if_overdue(&mut self) -> Result<bool, LogError> {
        if !self.has_unsynced_data {
            return Ok(false);
        }
        if let DurabilityMode::Standard { interval_ms } = self.shared.config.durability {
            if self.last_sync_time.elapsed().as_millis() as u64 >= interval_ms {
                self.sync_now()?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn counters(&self) -> LogCounters {
        self.counters.clone()
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if self.has_unsynced_data {
            if let Err(e) = self.segment.sync() {
                warn!(
                    target: "logsync::log",
                    partition = self.shared.partition,
                    segment = self.segment.segment_number(),
                    error = %e,
                    "Final sync on close failed"
                );
            }
        }
    }
}
