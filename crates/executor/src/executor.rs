//! The resilient executor: bounded retries with delay, classification and
//! an optional result predicate.

use crate::classify::{Classify, ErrorClass};
use crate::error::{ExecutorError, LastOutcome};
use crate::observer::{RetryObserver, TracingObserver};
use crate::policy::RetryPolicy;
use std::fmt;
use std::sync::Arc;

/// Runs fallible operations under a [`RetryPolicy`].
///
/// The executor holds no per-call state; clone it freely and share it
/// across threads. The inter-attempt sleep is a plain
/// `std::thread::sleep` on the calling thread.
///
/// # Example
///
/// ```ignore
/// let executor = ResilientExecutor::new(RetryPolicy::default());
///
/// executor.execute("BulkApply job", || store.bulk_apply("job", &records))?;
///
/// let status = executor
///     .with_max_attempts(u32::MAX)
///     .retry_while("PollTask reindex", || store.poll_task(&handle), |s| needs_poll(s))?;
/// ```
#[derive(Clone)]
pub struct ResilientExecutor {
    policy: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl ResilientExecutor {
    /// Create an executor reporting to a [`TracingObserver`].
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the observer (builder pattern).
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Copy of this executor with a different attempt budget.
    ///
    /// Used for polls that should outlast the default budget.
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            policy: self.policy.clone().with_max_attempts(max_attempts),
            observer: Arc::clone(&self.observer),
        }
    }

    /// The policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails fatally, or the budget runs out.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::Fatal`] on the first non-retryable error,
    /// [`ExecutorError::RetriesExhausted`] after `max_attempts` transient
    /// failures.
    pub fn execute<T, E, F>(&self, operation: &str, op: F) -> Result<T, ExecutorError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        self.run(operation, op, |_| false)
    }

    /// Run `op` until it returns a result for which `needs_retry` is false.
    ///
    /// Errors are classified as in [`execute`](Self::execute); unsatisfied
    /// results and transient errors draw from the same attempt budget.
    pub fn retry_while<T, E, F, P>(
        &self,
        operation: &str,
        op: F,
        needs_retry: P,
    ) -> Result<T, ExecutorError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&T) -> bool,
    {
        self.run(operation, op, needs_retry)
    }

    fn run<T, E, F, P>(
        &self,
        operation: &str,
        mut op: F,
        needs_retry: P,
    ) -> Result<T, ExecutorError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&T) -> bool,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let last = match op() {
                Ok(value) if !needs_retry(&value) => return Ok(value),
                Ok(_) => LastOutcome::Unsatisfied,
                Err(e) => match e.class() {
                    ErrorClass::Transient => LastOutcome::Error(e),
                    ErrorClass::Fatal => {
                        self.observer.on_fatal(operation, attempt + 1, &e);
                        return Err(ExecutorError::Fatal(e));
                    }
                },
            };
            attempt += 1;

            if attempt >= max_attempts {
                self.observer.on_exhausted(operation, attempt, &last);
                return Err(ExecutorError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    delay_ms: self.policy.base_delay_ms,
                    last,
                });
            }

            let delay = self.policy.delay_for(attempt - 1);
            self.observer
                .on_retry(operation, attempt, max_attempts, delay, &last);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }
}

impl Default for ResilientExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl fmt::Debug for ResilientExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("policy", &self.policy)
            .finish()
    }
}
