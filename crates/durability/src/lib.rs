//! Durability layer for logsync
//!
//! This crate handles everything that touches disk:
//!
//! - Log: segmented append-only partition log with CRC-framed records
//! - Readers: independent cursors with index-assisted seeks
//! - Durability modes: Always, Standard (default)
//! - Binary on-disk formats (segments, `.meta` sidecars)
//! - Checkpoint stores: durable import positions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod error;
pub mod format;
pub mod log;

pub use checkpoint::{FilePositionStore, MemoryPositionStore};
pub use error::LogError;
pub use log::{
    DurabilityMode, Log, LogConfig, LogConfigError, LogCounters, SegmentedLogReader,
};
