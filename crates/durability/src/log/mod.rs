//! Segmented, append-only partition log
//!
//! - `config`: log configuration (LogConfig, LogConfigError)
//! - `mode`: durability modes (Always, Standard)
//! - `writer`: appends and segment rotation
//! - `reader`: [`LogReader`](logsync_core::LogReader) implementation
//!
//! A [`Log`] handle owns the single writer of one partition and hands out
//! any number of readers. Handles are cheap to clone and may be shared
//! across threads.

pub mod config;
pub mod index;
pub mod mode;
pub mod reader;
mod scan;
mod table;
mod writer;

pub use config::{LogConfig, LogConfigError};
pub use mode::DurabilityMode;
pub use reader::SegmentedLogReader;
pub use writer::LogCounters;

use crate::error::LogError;
use logsync_core::{LogRecord, PartitionId, Position};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use table::SegmentTable;
use writer::LogWriter;

/// State shared by the writer and every reader of one log.
pub(crate) struct LogShared {
    pub dir: PathBuf,
    pub partition: PartitionId,
    pub config: LogConfig,
    pub table: RwLock<SegmentTable>,
}

/// Handle to one partition's log directory.
#[derive(Clone)]
pub struct Log {
    shared: Arc<LogShared>,
    writer: Arc<Mutex<LogWriter>>,
}

impl Log {
    /// Open (or create) the log stored in `dir`.
    ///
    /// Existing segments are validated, a partial record at the tail is
    /// truncated, and the last segment is reopened for appending.
    pub fn open(
        dir: impl AsRef<Path>,
        partition: PartitionId,
        config: LogConfig,
    ) -> Result<Self, LogError> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let recovered = scan::recover(&dir, partition, config.index_interval)?;
        let last_position = recovered.table.last_position();

        let shared = Arc::new(LogShared {
            dir,
            partition,
            config,
            table: RwLock::new(recovered.table),
        });
        let writer = LogWriter::new(
            Arc::clone(&shared),
            recovered.segment,
            recovered.log_uuid,
            last_position,
        );

        Ok(Log {
            shared,
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    /// Partition this log holds.
    pub fn partition(&self) -> PartitionId {
        self.shared.partition
    }

    /// Directory holding the segment files.
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Create a new reader positioned before the first record.
    pub fn reader(&self) -> SegmentedLogReader {
        SegmentedLogReader::new(Arc::clone(&self.shared))
    }

    /// Append a record at its own position.
    ///
    /// # Errors
    ///
    /// Rejects a position not strictly greater than the last appended one,
    /// a record of another partition, and an oversized value-type tag.
    pub fn append(&self, record: &LogRecord) -> Result<Position, LogError> {
        self.writer.lock().append(record)
    }

    /// Append a record at the next position and return it.
    pub fn append_next(
        &self,
        key: i64,
        value_type: &str,
        payload: Vec<u8>,
    ) -> Result<Position, LogError> {
        self.writer.lock().append_next(key, value_type, payload)
    }

    /// Force appended records to disk.
    pub fn flush(&self) -> Result<(), LogError> {
        self.writer.lock().flush()
    }

    /// Sync if the Standard interval has elapsed. Returns whether it synced.
    pub fn sync_if_overdue(&self) -> Result<bool, LogError> {
        self.writer.lock().sync_if_overdue()
    }

    /// Position of the first record, negative if the log is empty.
    pub fn first_position(&self) -> Position {
        self.shared.table.read().first_position()
    }

    /// Position of the last record, negative if the log is empty.
    pub fn last_position(&self) -> Position {
        self.writer.lock().last_position()
    }

    /// Number of committed records.
    pub fn record_count(&self) -> u64 {
        self.shared.table.read().record_count()
    }

    /// Number of segment files, including the active one.
    pub fn segment_count(&self) -> usize {
        self.shared.table.read().segment_count()
    }

    /// Snapshot of the writer's cumulative counters.
    pub fn counters(&self) -> LogCounters {
        self.writer.lock().counters()
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("dir", &self.shared.dir)
            .field("partition", &self.shared.partition)
            .finish()
    }
}
