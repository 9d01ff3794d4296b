//! Long-running store task types
//!
//! Schema and maintenance operations (reindexing a collection, for example)
//! run asynchronously inside the external store. Submitting one returns a
//! [`TaskHandle`]; polling the handle returns a [`TaskStatus`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Description of a long-running task to submit to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskSpec {
    /// Copy every document of `source` into `destination`
    Reindex {
        /// Source collection
        source: String,
        /// Destination collection
        destination: String,
    },
}

impl fmt::Display for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSpec::Reindex {
                source,
                destination,
            } => write!(f, "Reindex {} -> {}", source, destination),
        }
    }
}

/// Opaque handle identifying a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub String);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress snapshot of a long-running task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Whether the store reports the task as done
    pub completed: bool,
    /// Number of documents the task will touch
    pub total: u64,
    /// Documents created so far
    pub created: u64,
    /// Documents updated so far
    pub updated: u64,
    /// Documents deleted so far
    pub deleted: u64,
}

impl TaskStatus {
    /// Documents the task has processed so far
    pub fn changed(&self) -> u64 {
        self.created + self.updated + self.deleted
    }
}
