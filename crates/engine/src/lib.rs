//! Import engine for logsync
//!
//! This crate turns partition logs into store writes:
//! - Scanner: builds Import Batches from the log, one cursor per value-type
//! - Job: persists a batch through the resilient executor, then checkpoints
//! - Position holder: durable, monotonic per-pair checkpoints
//! - Scheduler: worker pool, one in-flight batch per pair, halts on regression
//! - Status board: per-pair progress and lag for monitoring
//! - Maintenance: reindexing through long-running store tasks
//! - Memory store: reference `StoreSink` with upsert semantics
//!
//! The engine never talks to a log or store directly; it only uses the
//! capability traits from `logsync-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod config;
pub mod error;
pub mod job;
pub mod maintenance;
pub mod memory;
pub mod pool;
pub mod position;
pub mod scanner;
pub mod scheduler;
pub mod status;

pub use batch::{BatchState, ImportBatch};
pub use config::{ConfigError, ImporterConfig, LogSection, RetrySection, CONFIG_FILE_NAME};
pub use error::{BatchError, EngineError, SchedulerError};
pub use job::{ImportJob, ImportOutcome};
pub use maintenance::{needs_to_poll_again, Maintenance, ReindexOutcome};
pub use memory::{MemoryStore, StoredDocument};
pub use pool::{PoolStats, WorkerPool};
pub use position::{ImportPositionHolder, RegressionPolicy};
pub use scanner::{RecordScanner, DEFAULT_MAX_BATCH_SIZE};
pub use scheduler::{CycleReport, ImportScheduler, SchedulerStats};
pub use status::{ImportStatusBoard, PairOutcome, PairStatus};
