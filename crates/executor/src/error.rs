//! Error types for resilient execution.
//!
//! | Variant            | Meaning                                          |
//! |--------------------|--------------------------------------------------|
//! | `Fatal`            | operation failed with a non-retryable error      |
//! | `RetriesExhausted` | every attempt failed or left the predicate unmet |

use logsync_core::{ImportError, StoreError};
use std::fmt;

/// What the last attempt of an exhausted operation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastOutcome<E> {
    /// The operation failed with a transient error
    Error(E),
    /// The operation succeeded but its result still needed a retry
    Unsatisfied,
}

impl<E: fmt::Display> fmt::Display for LastOutcome<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastOutcome::Error(e) => write!(f, "{}", e),
            LastOutcome::Unsatisfied => f.write_str("result did not satisfy the retry predicate"),
        }
    }
}

/// Failure of an operation run through the executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError<E> {
    /// Non-retryable failure; no further attempt was made
    #[error("{0}")]
    Fatal(E),

    /// The attempt budget ran out
    #[error(
        "Couldn't execute operation {operation} for {attempts} attempts with {delay_ms} ms waiting: {last}"
    )]
    RetriesExhausted {
        /// Operation name
        operation: String,
        /// Attempts made
        attempts: u32,
        /// Configured base delay between attempts in milliseconds
        delay_ms: u64,
        /// Last failure or unsatisfied result
        last: LastOutcome<E>,
    },
}

impl<E> ExecutorError<E> {
    /// Whether the attempt budget ran out
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ExecutorError::RetriesExhausted { .. })
    }
}

impl From<ExecutorError<StoreError>> for ImportError {
    fn from(e: ExecutorError<StoreError>) -> Self {
        match e {
            ExecutorError::Fatal(e) => e.into(),
            ExecutorError::RetriesExhausted {
                operation,
                attempts,
                delay_ms,
                last,
            } => ImportError::RetriesExhausted {
                operation,
                attempts,
                delay_ms,
                last: last.to_string(),
            },
        }
    }
}
