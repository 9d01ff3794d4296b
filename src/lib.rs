//! logsync - Replicates a partitioned append-only event log into an external store
//!
//! Records are read from each partition's log, grouped into batches per
//! value-type, written to the store through a retrying executor, and
//! checkpointed durably once the store has accepted them. A crash between
//! the write and the checkpoint re-delivers the batch; the store's upserts
//! make that invisible.
//!
//! # Quick Start
//!
//! ```ignore
//! use logsync::{
//!     FilePositionStore, ImportPositionHolder, ImportScheduler, ImporterConfig, Log,
//!     MemoryStore, RecordScanner,
//! };
//! use std::sync::Arc;
//!
//! let config = ImporterConfig::from_file("logsync.toml".as_ref())?;
//! let log = Log::open("data/partition-0", 0, config.log_config()?)?;
//! let positions = Arc::new(ImportPositionHolder::from_config(
//!     Arc::new(FilePositionStore::open("data/positions.json")?),
//!     &config,
//! )?);
//!
//! let scheduler = ImportScheduler::new(&config, Arc::new(MemoryStore::new()), positions)?;
//! scheduler.add_scanner(
//!     RecordScanner::new(Box::new(log.reader()), config.max_batch_size)
//!         .with_value_type("job", "job-index"),
//! );
//! scheduler.run_until_caught_up()?;
//! ```
//!
//! # Architecture
//!
//! - `logsync-core`: record and checkpoint types, the log/store/checkpoint traits
//! - `logsync-durability`: segmented on-disk log and checkpoint stores
//! - `logsync-executor`: retry policy and the resilient executor
//! - `logsync-engine`: scanner, jobs, position holder and scheduler

pub use logsync_core::{
    now_micros, CheckpointError, ImportError, ImportKey, ImportPosition, ImportResult, LogReader,
    LogRecord, NoSuchRecord, PartitionId, Position, PositionStore, StoreError, StoreSink,
    TaskHandle, TaskSpec, TaskStatus, ValueType, NO_POSITION,
};
pub use logsync_durability::{
    DurabilityMode, FilePositionStore, Log, LogConfig, LogError, MemoryPositionStore,
    SegmentedLogReader,
};
pub use logsync_engine::{
    needs_to_poll_again, BatchState, ConfigError, CycleReport, EngineError, ImportBatch,
    ImportJob, ImportOutcome, ImportPositionHolder, ImportScheduler, ImportStatusBoard,
    ImporterConfig, Maintenance, MemoryStore, PairOutcome, PairStatus, RecordScanner,
    ReindexOutcome, RegressionPolicy, SchedulerError,
};
pub use logsync_executor::{
    Backoff, ExecutorError, LastOutcome, NoopObserver, ResilientExecutor, RetryObserver,
    RetryPolicy, TracingObserver,
};
