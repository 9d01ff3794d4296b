//! Retryable/fatal classification of operation errors.

use logsync_core::{ImportError, StoreError};

/// Whether a failed attempt may succeed if repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry after the policy's delay
    Transient,
    /// Abort immediately
    Fatal,
}

/// Errors the executor knows how to classify.
///
/// Each adapter classifies its own failures; the executor never inspects
/// error contents beyond this.
pub trait Classify {
    /// Classify this error
    fn class(&self) -> ErrorClass;
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        if self.is_transient() {
            ErrorClass::Transient
        } else {
            ErrorClass::Fatal
        }
    }
}

impl Classify for ImportError {
    fn class(&self) -> ErrorClass {
        match self {
            ImportError::TransientStoreError(_) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }
}
