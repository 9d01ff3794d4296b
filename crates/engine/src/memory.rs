//! In-memory reference store.
//!
//! [`MemoryStore`] is the reference implementation of [`StoreSink`]:
//!
//! - `bulk_apply` upserts by record key and is all-or-nothing
//! - a document never goes back to an older position, so re-delivered
//!   batches are harmless
//! - long-running tasks complete after a configurable number of polls
//!
//! Failure injection hooks let tests drive the pipeline through transient
//! outages, rejected documents, vanished tasks and short reindexes.

use dashmap::DashMap;
use logsync_core::{
    LogRecord, Position, StoreError, StoreSink, TaskHandle, TaskSpec, TaskStatus, ValueType,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A document as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// Record key the document is upserted by
    pub key: i64,
    /// Log position of the record that last wrote the document
    pub position: Position,
    /// Value-type of that record
    pub value_type: ValueType,
    /// Payload of that record
    pub payload: Vec<u8>,
}

impl From<&LogRecord> for StoredDocument {
    fn from(record: &LogRecord) -> Self {
        StoredDocument {
            key: record.key,
            position: record.position,
            value_type: record.value_type.clone(),
            payload: record.payload.clone(),
        }
    }
}

#[derive(Debug)]
struct TaskProgress {
    total: u64,
    polls_needed: u32,
    polls_done: u32,
}

impl TaskProgress {
    fn status(&self) -> TaskStatus {
        let completed = self.polls_done >= self.polls_needed;
        let created = if completed || self.total == 0 {
            self.total
        } else {
            (self.total * u64::from(self.polls_done) / u64::from(self.polls_needed))
                .clamp(1, self.total)
        };
        TaskStatus {
            completed,
            total: self.total,
            created,
            updated: 0,
            deleted: 0,
        }
    }
}

type Collection = BTreeMap<i64, StoredDocument>;

/// [`StoreSink`] keeping collections in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<String, Collection>,
    failures: Mutex<VecDeque<StoreError>>,
    rejected_keys: Mutex<BTreeSet<i64>>,
    tasks: DashMap<TaskHandle, TaskProgress>,
    task_shortfalls: Mutex<VecDeque<u64>>,
    task_polls: AtomicU32,
    next_task: AtomicU64,
    apply_calls: AtomicU64,
    delete_calls: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store whose tasks complete on the first poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make long-running tasks report completion only on their
    /// `polls`-th poll (builder pattern).
    pub fn with_task_polls(self, polls: u32) -> Self {
        self.task_polls.store(polls, Ordering::Relaxed);
        self
    }

    /// Fail the next `times` calls to `bulk_apply` with `error`.
    pub fn fail_next(&self, times: usize, error: StoreError) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat(error).take(times));
    }

    /// Reject, as a fatal error, every batch containing `key`.
    pub fn reject_key(&self, key: i64) {
        self.rejected_keys.lock().insert(key);
    }

    /// Stop rejecting `key`.
    pub fn accept_key(&self, key: i64) {
        self.rejected_keys.lock().remove(&key);
    }

    /// Make the next submitted task report `missing` fewer documents than
    /// its source holds.
    pub fn shortfall_next_task(&self, missing: u64) {
        self.task_shortfalls.lock().push_back(missing);
    }

    /// Drop every task, as if the store had been restarted.
    pub fn forget_tasks(&self) {
        self.tasks.clear();
    }

    /// Number of `bulk_apply` calls, failed ones included
    pub fn apply_calls(&self) -> u64 {
        self.apply_calls.load(Ordering::Relaxed)
    }

    /// Number of `delete_task` calls, unknown tasks included
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    /// Number of tasks the store still holds
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of documents in `collection`
    pub fn count_documents(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.len())
    }

    /// Document with `key` in `collection`
    pub fn document(&self, collection: &str, key: i64) -> Option<StoredDocument> {
        self.collections
            .get(collection)
            .and_then(|c| c.get(&key).cloned())
    }

    /// Every document in `collection`, ordered by key
    pub fn documents(&self, collection: &str) -> Vec<StoredDocument> {
        self.collections
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of every collection holding documents
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn upsert(&self, collection: &str, documents: impl IntoIterator<Item = StoredDocument>) {
        let mut target = self.collections.entry(collection.to_string()).or_default();
        for document in documents {
            let newer = target
                .get(&document.key)
                .map_or(true, |stored| stored.position <= document.position);
            if newer {
                target.insert(document.key, document);
            }
        }
    }
}

impl StoreSink for MemoryStore {
    fn bulk_apply(&self, collection: &str, records: &[LogRecord]) -> Result<(), StoreError> {
        self.apply_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        {
            let rejected = self.rejected_keys.lock();
            if let Some(record) = records.iter().find(|r| rejected.contains(&r.key)) {
                return Err(StoreError::fatal(format!(
                    "document {} at position {} rejected by {}",
                    record.key, record.position, collection
                )));
            }
        }
        self.upsert(collection, records.iter().map(StoredDocument::from));
        Ok(())
    }

    fn count(&self, collection: &str) -> Result<u64, StoreError> {
        Ok(self.count_documents(collection) as u64)
    }

    fn submit_long_task(&self, spec: &TaskSpec) -> Result<TaskHandle, StoreError> {
        let total = match spec {
            TaskSpec::Reindex {
                source,
                destination,
            } => {
                // Copy out first: source and destination may share a shard
                let documents = self.documents(source);
                let total = documents.len() as u64;
                self.upsert(destination, documents);
                total
            }
        };
        let shortfall = self.task_shortfalls.lock().pop_front().unwrap_or(0);
        let id = self.next_task.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = TaskHandle(format!("memory:{}", id));
        self.tasks.insert(
            handle.clone(),
            TaskProgress {
                total: total.saturating_sub(shortfall),
                polls_needed: self.task_polls.load(Ordering::Relaxed).max(1),
                polls_done: 0,
            },
        );
        Ok(handle)
    }

    fn poll_task(&self, handle: &TaskHandle) -> Result<Option<TaskStatus>, StoreError> {
        Ok(self.tasks.get_mut(handle).map(|mut progress| {
            progress.polls_done = progress.polls_done.saturating_add(1);
            progress.status()
        }))
    }

    fn delete_task(&self, handle: &TaskHandle) -> Result<(), StoreError> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        self.tasks.remove(handle);
        Ok(())
    }
}
