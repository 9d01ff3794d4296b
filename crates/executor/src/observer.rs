//! Observation hooks for retry loops.
//!
//! The executor itself never logs. Everything it would want to say goes
//! through a [`RetryObserver`].

use std::fmt;
use std::time::Duration;
use tracing::{error, warn};

/// Receives retry loop events.
pub trait RetryObserver: Send + Sync {
    /// An attempt failed (or left the predicate unmet) and will be retried
    /// after `delay`. `attempt` is one-based.
    fn on_retry(
        &self,
        operation: &str,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        reason: &dyn fmt::Display,
    );

    /// An attempt failed with a non-retryable error.
    fn on_fatal(&self, _operation: &str, _attempt: u32, _error: &dyn fmt::Display) {}

    /// The attempt budget ran out.
    fn on_exhausted(&self, _operation: &str, _attempts: u32, _last: &dyn fmt::Display) {}
}

/// Emits `tracing` events for every retry, fatal failure and exhaustion.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_retry(
        &self,
        operation: &str,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        reason: &dyn fmt::Display,
    ) {
        warn!(
            target: "logsync::executor",
            op = operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "Operation attempt failed, retrying"
        );
    }

    fn on_fatal(&self, operation: &str, attempt: u32, error: &dyn fmt::Display) {
        error!(
            target: "logsync::executor",
            op = operation,
            attempt,
            error = %error,
            "Operation failed with non-retryable error"
        );
    }

    fn on_exhausted(&self, operation: &str, attempts: u32, last: &dyn fmt::Display) {
        error!(
            target: "logsync::executor",
            op = operation,
            attempts,
            last = %last,
            "Operation retries exhausted"
        );
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RetryObserver for NoopObserver {
    fn on_retry(&self, _: &str, _: u32, _: u32, _: Duration, _: &dyn fmt::Display) {}
}
