//! Store maintenance operations built on the resilient executor.
//!
//! A reindex copies one collection into another through a long-running
//! store task:
//!
//! 1. Optionally skip the work if both collections already hold the same
//!    number of documents.
//! 2. Submit the task and poll it until it reports completion.
//! 3. Delete the finished task from the store.
//! 4. Compare the task's total with the source count. A mismatch, or a
//!    task the store forgot about, fails the attempt and the whole
//!    sequence is retried under the executor's budget.

use logsync_core::{StoreError, StoreSink, TaskSpec, TaskStatus};
use logsync_executor::{ExecutorError, ResilientExecutor};
use std::sync::Arc;
use tracing::{info, warn};

/// How one reindex attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexOutcome {
    /// Source and destination counts already matched
    AlreadyDone,
    /// The task migrated every source document
    Reindexed {
        /// Documents migrated
        documents: u64,
    },
    /// The task's total differs from the source count
    CountMismatch {
        /// Source documents
        expected: u64,
        /// Documents the task reported
        migrated: u64,
    },
    /// The store no longer knows the task
    TaskVanished,
}

impl ReindexOutcome {
    /// Whether the attempt has to be repeated
    pub fn needs_retry(&self) -> bool {
        matches!(
            self,
            ReindexOutcome::CountMismatch { .. } | ReindexOutcome::TaskVanished
        )
    }
}

/// Whether a task must be polled again.
///
/// An unknown task is not polled again; the caller starts over. A task
/// that reports documents but has changed none of them has nothing left to
/// migrate. Otherwise poll until the task is complete and every document
/// is accounted for.
pub fn needs_to_poll_again(status: Option<&TaskStatus>) -> bool {
    let Some(status) = status else {
        return false;
    };
    if status.changed() == 0 && status.total > 0 {
        return false;
    }
    !status.completed || status.changed() != status.total
}

/// Maintenance operations against a store.
#[derive(Clone)]
pub struct Maintenance {
    store: Arc<dyn StoreSink>,
    executor: ResilientExecutor,
    poll_attempts: u32,
}

impl Maintenance {
    /// Create a maintenance handle.
    ///
    /// Task polls are unbounded by default; see
    /// [`with_poll_attempts`](Self::with_poll_attempts).
    pub fn new(store: Arc<dyn StoreSink>, executor: ResilientExecutor) -> Self {
        Maintenance {
            store,
            executor,
            poll_attempts: u32::MAX,
        }
    }

    /// Bound the number of polls per task (builder pattern).
    pub fn with_poll_attempts(mut self, attempts: u32) -> Self {
        self.poll_attempts = attempts;
        self
    }

    /// Copy `source` into `destination`.
    ///
    /// Returns [`ReindexOutcome::AlreadyDone`] or
    /// [`ReindexOutcome::Reindexed`].
    ///
    /// # Errors
    ///
    /// A fatal store error, or exhaustion of the executor's budget, in which
    /// case `last` is [`LastOutcome::Unsatisfied`](logsync_executor::LastOutcome)
    /// if every attempt ended in a mismatch.
    pub fn reindex(
        &self,
        source: &str,
        destination: &str,
        check_document_count: bool,
    ) -> Result<ReindexOutcome, ExecutorError<StoreError>> {
        let operation = format!("Reindex {} -> {}", source, destination);
        self.executor.retry_while(
            &operation,
            || self.reindex_once(source, destination, check_document_count),
            ReindexOutcome::needs_retry,
        )
    }

    fn reindex_once(
        &self,
        source: &str,
        destination: &str,
        check_document_count: bool,
    ) -> Result<ReindexOutcome, StoreError> {
        let source_count = self.store.count(source)?;
        if check_document_count {
            let destination_count = self.store.count(destination)?;
            if source_count == destination_count {
                info!(
                    target: "logsync::maintenance",
                    source,
                    destination,
                    documents = source_count,
                    "Reindex already done"
                );
                return Ok(ReindexOutcome::AlreadyDone);
            }
        }

        let handle = self.store.submit_long_task(&TaskSpec::Reindex {
            source: source.to_string(),
            destination: destination.to_string(),
        })?;

        let status = self
            .executor
            .with_max_attempts(self.poll_attempts)
            .retry_while(
                &format!("PollTask {}", handle),
                || self.store.poll_task(&handle),
                |status| needs_to_poll_again(status.as_ref()),
            )
            .map_err(flatten)?;

        let Some(status) = status else {
            warn!(
                target: "logsync::maintenance",
                task = %handle,
                "Reindex task vanished; starting over"
            );
            return Ok(ReindexOutcome::TaskVanished);
        };

        self.executor
            .execute(&format!("DeleteTask {}", handle), || {
                self.store.delete_task(&handle)
            })
            .map_err(flatten)?;

        info!(
            target: "logsync::maintenance",
            source,
            destination,
            source_documents = source_count,
            migrated = status.total,
            "Reindex task finished"
        );
        if status.total == source_count {
            Ok(ReindexOutcome::Reindexed {
                documents: status.total,
            })
        } else {
            Ok(ReindexOutcome::CountMismatch {
                expected: source_count,
                migrated: status.total,
            })
        }
    }
}

/// Fold an inner executor error into the store error the outer attempt sees.
fn flatten(error: ExecutorError<StoreError>) -> StoreError {
    match error {
        ExecutorError::Fatal(e) => e,
        exhausted => StoreError::transient(exhausted.to_string()),
    }
}

impl std::fmt::Debug for Maintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Maintenance")
            .field("executor", &self.executor)
            .field("poll_attempts", &self.poll_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use logsync_core::{LogRecord, TaskHandle};
    use logsync_executor::{LastOutcome, NoopObserver, RetryPolicy};

    fn status(completed: bool, total: u64, created: u64) -> TaskStatus {
        TaskStatus {
            completed,
            total,
            created,
            ..TaskStatus::default()
        }
    }

    fn seeded_store(documents: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new().with_task_polls(3));
        let records: Vec<_> = (1..=documents)
            .map(|p| LogRecord::new(0, p, p, "list-view", vec![]))
            .collect();
        store.bulk_apply("list-view-1.0", &records).unwrap();
        store
    }

    fn maintenance(store: Arc<MemoryStore>) -> Maintenance {
        let executor =
            ResilientExecutor::new(RetryPolicy::for_testing()).with_observer(Arc::new(NoopObserver));
        Maintenance::new(store, executor).with_poll_attempts(10)
    }

    #[test]
    fn test_needs_to_poll_again() {
        assert!(!needs_to_poll_again(None));
        // Nothing changed although there is work: nothing to migrate
        assert!(!needs_to_poll_again(Some(&status(false, 10, 0))));
        assert!(needs_to_poll_again(Some(&status(false, 10, 4))));
        assert!(needs_to_poll_again(Some(&status(true, 10, 4))));
        assert!(!needs_to_poll_again(Some(&status(true, 10, 10))));
        assert!(!needs_to_poll_again(Some(&status(true, 0, 0))));
        assert!(needs_to_poll_again(Some(&status(false, 0, 0))));
    }

    #[test]
    fn test_reindex_copies_documents() {
        let store = seeded_store(6);
        let outcome = maintenance(store.clone())
            .reindex("list-view-1.0", "list-view-1.1", true)
            .unwrap();
        assert_eq!(outcome, ReindexOutcome::Reindexed { documents: 6 });
        assert_eq!(store.count_documents("list-view-1.1"), 6);
        // Three polls, one delete
        assert_eq!(store.delete_calls(), 1);
        assert_eq!(store.task_count(), 0);
    }

    #[test]
    fn test_matching_counts_short_circuit() {
        let store = seeded_store(4);
        let m = maintenance(store.clone());
        m.reindex("list-view-1.0", "list-view-1.1", true).unwrap();

        assert_eq!(
            m.reindex("list-view-1.0", "list-view-1.1", true).unwrap(),
            ReindexOutcome::AlreadyDone
        );
        // No task was submitted, so none was deleted
        assert_eq!(store.delete_calls(), 1);
        // Without the check the task runs again
        assert_eq!(
            m.reindex("list-view-1.0", "list-view-1.1", false).unwrap(),
            ReindexOutcome::Reindexed { documents: 4 }
        );
    }

    #[test]
    fn test_count_mismatch_is_retried() {
        let store = seeded_store(5);
        store.shortfall_next_task(2);

        let outcome = maintenance(store.clone())
            .reindex("list-view-1.0", "list-view-1.1", false)
            .unwrap();
        assert_eq!(outcome, ReindexOutcome::Reindexed { documents: 5 });
        // Each finished task is deleted once, the short one included
        assert_eq!(store.delete_calls(), 2);
        assert_eq!(store.task_count(), 0);
    }

    #[test]
    fn test_persistent_mismatch_exhausts() {
        let store = seeded_store(5);
        for _ in 0..3 {
            store.shortfall_next_task(1);
        }

        match maintenance(store).reindex("list-view-1.0", "list-view-1.1", false) {
            Err(ExecutorError::RetriesExhausted {
                operation,
                attempts,
                last,
                ..
            }) => {
                assert_eq!(operation, "Reindex list-view-1.0 -> list-view-1.1");
                assert_eq!(attempts, 3);
                assert_eq!(last, LastOutcome::Unsatisfied);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    /// Store whose tasks vanish on the first submit only.
    struct ForgetfulStore {
        inner: MemoryStore,
        forgot: parking_lot::Mutex<bool>,
    }

    impl StoreSink for ForgetfulStore {
        fn bulk_apply(&self, collection: &str, records: &[LogRecord]) -> Result<(), StoreError> {
            self.inner.bulk_apply(collection, records)
        }
        fn count(&self, collection: &str) -> Result<u64, StoreError> {
            self.inner.count(collection)
        }
        fn submit_long_task(&self, spec: &TaskSpec) -> Result<TaskHandle, StoreError> {
            let handle = self.inner.submit_long_task(spec)?;
            let mut forgot = self.forgot.lock();
            if !*forgot {
                *forgot = true;
                self.inner.forget_tasks();
            }
            Ok(handle)
        }
        fn poll_task(&self, handle: &TaskHandle) -> Result<Option<TaskStatus>, StoreError> {
            self.inner.poll_task(handle)
        }
        fn delete_task(&self, handle: &TaskHandle) -> Result<(), StoreError> {
            self.inner.delete_task(handle)
        }
    }

    #[test]
    fn test_vanished_task_starts_over() {
        let inner = MemoryStore::new();
        inner
            .bulk_apply("a", &[LogRecord::new(0, 1, 1, "x", vec![])])
            .unwrap();
        let store = Arc::new(ForgetfulStore {
            inner,
            forgot: parking_lot::Mutex::new(false),
        });
        let executor =
            ResilientExecutor::new(RetryPolicy::for_testing()).with_observer(Arc::new(NoopObserver));

        let outcome = Maintenance::new(store.clone(), executor)
            .reindex("a", "b", false)
            .unwrap();
        assert_eq!(outcome, ReindexOutcome::Reindexed { documents: 1 });
        // Only the task that finished is deleted
        assert_eq!(store.inner.delete_calls(), 1);
    }

    #[test]
    fn test_fatal_count_error_aborts() {
        struct Broken;
        impl StoreSink for Broken {
            fn bulk_apply(&self, _: &str, _: &[LogRecord]) -> Result<(), StoreError> {
                Ok(())
            }
            fn count(&self, _: &str) -> Result<u64, StoreError> {
                Err(StoreError::fatal("no such index"))
            }
            fn submit_long_task(&self, _: &TaskSpec) -> Result<TaskHandle, StoreError> {
                unreachable!()
            }
            fn poll_task(&self, _: &TaskHandle) -> Result<Option<TaskStatus>, StoreError> {
                unreachable!()
            }
            fn delete_task(&self, _: &TaskHandle) -> Result<(), StoreError> {
                unreachable!()
            }
        }

        let executor =
            ResilientExecutor::new(RetryPolicy::for_testing()).with_observer(Arc::new(NoopObserver));
        let result = Maintenance::new(Arc::new(Broken), executor).reindex("a", "b", true);
        assert_eq!(result, Err(ExecutorError::Fatal(StoreError::fatal("no such index"))));
    }
}
