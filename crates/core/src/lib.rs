//! Core types and traits for logsync
//!
//! This crate defines the foundational types used throughout the system:
//! - Position / PartitionId / ValueType: addressing inside the log
//! - LogRecord: immutable record read from a partition
//! - ImportKey / ImportPosition: checkpoint identity and value
//! - Error: the pipeline's error taxonomy
//! - Traits: LogReader, StoreSink, PositionStore
//! - Task types: long-running store task submission and polling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod task;
pub mod traits;
pub mod types;

pub use error::{CheckpointError, ImportError, ImportResult, NoSuchRecord, StoreError};
pub use task::{TaskHandle, TaskSpec, TaskStatus};
pub use traits::{LogReader, PositionStore, StoreSink};
pub use types::{
    now_micros, ImportKey, ImportPosition, LogRecord, PartitionId, Position, ValueType,
    MAX_VALUE_TYPE_LEN, NO_POSITION,
};
