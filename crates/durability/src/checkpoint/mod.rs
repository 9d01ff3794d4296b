//! Durable storage for import checkpoints
//!
//! - `file`: JSON file replaced atomically on every store
//! - `memory`: in-process map, for tests and ephemeral pipelines

pub mod file;
pub mod memory;

pub use file::FilePositionStore;
pub use memory::MemoryPositionStore;
