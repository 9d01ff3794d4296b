//! Import Position Holder
//!
//! Maps each (value-type, partition) pair to the position of the last record
//! known to be persisted in the external store. This is the only state the
//! pipeline needs to resume after a restart.
//!
//! Updates are compare-and-set per pair: a per-pair write lock is held
//! across the comparison, the durable write and the in-memory update, so two
//! jobs can never interleave a regression for the same pair. The map itself
//! is only locked for the final insert; readers and writers of other pairs
//! never wait on a store write.

use crate::config::ImporterConfig;
use dashmap::DashMap;
use parking_lot::Mutex;
use logsync_core::{
    CheckpointError, ImportKey, ImportPosition, PartitionId, Position, PositionStore, ValueType,
    NO_POSITION,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What to do with a position lower than the stored checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegressionPolicy {
    /// Fail with `PositionRegressionRejected`
    #[default]
    Reject,
    /// Keep the stored checkpoint and report success
    Clamp,
}

/// Durable per-pair checkpoint with write-through persistence.
pub struct ImportPositionHolder {
    store: Arc<dyn PositionStore>,
    positions: DashMap<ImportKey, ImportPosition>,
    /// Serializes writers of one pair
    write_locks: DashMap<ImportKey, Arc<Mutex<()>>>,
    policy: RegressionPolicy,
}

impl ImportPositionHolder {
    /// Load every checkpoint from `store`.
    pub fn open(
        store: Arc<dyn PositionStore>,
        policy: RegressionPolicy,
    ) -> Result<Self, CheckpointError> {
        let positions = DashMap::new();
        for position in store.load_all()? {
            positions.insert(position.key(), position);
        }
        debug!(
            target: "logsync::positions",
            pairs = positions.len(),
            ?policy,
            "Loaded import positions"
        );
        Ok(ImportPositionHolder {
            store,
            positions,
            write_locks: DashMap::new(),
            policy,
        })
    }

    /// Load every checkpoint from `store`, handling regressions with the
    /// configured `regression_policy`.
    pub fn from_config(
        store: Arc<dyn PositionStore>,
        config: &ImporterConfig,
    ) -> Result<Self, CheckpointError> {
        Self::open(store, config.regression_policy)
    }

    /// Last checkpointed position of a pair, or [`NO_POSITION`] if the pair
    /// has never been imported.
    pub fn get(&self, value_type: &ValueType, partition: PartitionId) -> Position {
        self.get_key(&ImportKey::new(value_type.clone(), partition))
    }

    /// Same as [`get`](Self::get), keyed by pair.
    pub fn get_key(&self, key: &ImportKey) -> Position {
        self.positions
            .get(key)
            .map_or(NO_POSITION, |entry| entry.position)
    }

    /// Advance a pair's checkpoint to `position`.
    ///
    /// Returns the checkpoint in effect afterwards. An equal position is a
    /// no-op. A lower position is rejected or clamped according to the
    /// [`RegressionPolicy`]. A higher position is written to the
    /// [`PositionStore`] before it becomes visible through `get`; if that
    /// write fails the checkpoint does not move.
    pub fn record_latest_loaded_position(
        &self,
        key: &ImportKey,
        routing_key: &str,
        position: Position,
    ) -> Result<Position, CheckpointError> {
        let lock = self.write_lock(key);
        let _guard = lock.lock();

        let current = self.positions.get(key).map(|entry| entry.clone());
        let next = match current {
            Some(current) => {
                if position == current.position {
                    return Ok(current.position);
                }
                if position < current.position {
                    return self.regression(key, current.position, position);
                }
                let mut next = current;
                next.position = position;
                next.routing_key = routing_key.to_string();
                next.sequence += 1;
                next.updated_at = chrono::Utc::now();
                next
            }
            None => {
                if position < NO_POSITION {
                    return self.regression(key, NO_POSITION, position);
                }
                let mut next = ImportPosition::new(key, routing_key, position);
                next.sequence = 1;
                next
            }
        };
        self.store.store(&next)?;
        self.positions.insert(key.clone(), next);
        Ok(position)
    }

    fn write_lock(&self, key: &ImportKey) -> Arc<Mutex<()>> {
        Arc::clone(&self.write_locks.entry(key.clone()).or_default())
    }

    fn regression(
        &self,
        key: &ImportKey,
        stored: Position,
        attempted: Position,
    ) -> Result<Position, CheckpointError> {
        match self.policy {
            RegressionPolicy::Reject => {
                error!(
                    target: "logsync::positions",
                    pair = %key,
                    stored,
                    attempted,
                    "Rejected import position regression"
                );
                Err(CheckpointError::PositionRegressionRejected {
                    key: key.clone(),
                    stored,
                    attempted,
                })
            }
            RegressionPolicy::Clamp => {
                warn!(
                    target: "logsync::positions",
                    pair = %key,
                    stored,
                    attempted,
                    "Clamped import position regression"
                );
                Ok(stored)
            }
        }
    }

    /// Full checkpoint of a pair, if one exists.
    pub fn checkpoint(&self, key: &ImportKey) -> Option<ImportPosition> {
        self.positions.get(key).map(|entry| entry.clone())
    }

    /// Every checkpoint, ordered by pair.
    pub fn snapshot(&self) -> Vec<ImportPosition> {
        let mut all: Vec<ImportPosition> =
            self.positions.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by(|a, b| {
            (&a.value_type, a.partition).cmp(&(&b.value_type, b.partition))
        });
        all
    }

    /// The configured regression policy
    pub fn policy(&self) -> RegressionPolicy {
        self.policy
    }
}

impl std::fmt::Debug for ImportPositionHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportPositionHolder")
            .field("pairs", &self.positions.len())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsync_durability::{FilePositionStore, MemoryPositionStore};
    use proptest::prelude::*;
    use std::sync::{mpsc, Barrier};
    use std::time::Duration;
    use tempfile::tempdir;

    fn holder(policy: RegressionPolicy) -> (Arc<MemoryPositionStore>, ImportPositionHolder) {
        let store = Arc::new(MemoryPositionStore::new());
        let holder = ImportPositionHolder::open(store.clone(), policy).unwrap();
        (store, holder)
    }

    /// Store that fails every write while `fail` is set.
    #[derive(Default)]
    struct FlakyStore {
        fail: Mutex<bool>,
        inner: MemoryPositionStore,
    }

    impl PositionStore for FlakyStore {
        fn load_all(&self) -> Result<Vec<ImportPosition>, CheckpointError> {
            self.inner.load_all()
        }

        fn store(&self, position: &ImportPosition) -> Result<(), CheckpointError> {
            if *self.fail.lock() {
                return Err(CheckpointError::Io("disk full".into()));
            }
            self.inner.store(position)
        }
    }

    #[test]
    fn test_unknown_pair_is_unset() {
        let (_, holder) = holder(RegressionPolicy::Reject);
        assert_eq!(holder.get(&ValueType::new("job"), 1), NO_POSITION);
        assert!(holder.snapshot().is_empty());
    }

    #[test]
    fn test_advance_writes_through() {
        let (store, holder) = holder(RegressionPolicy::Reject);
        let key = ImportKey::new("job", 1);

        assert_eq!(holder.record_latest_loaded_position(&key, "job-index", 10), Ok(10));
        assert_eq!(holder.record_latest_loaded_position(&key, "job-index", 25), Ok(25));

        assert_eq!(holder.get_key(&key), 25);
        let stored = store.get(&key).unwrap();
        assert_eq!(stored.position, 25);
        assert_eq!(stored.sequence, 2);
        assert_eq!(stored.routing_key, "job-index");
    }

    #[test]
    fn test_equal_position_is_noop() {
        let (store, holder) = holder(RegressionPolicy::Reject);
        let key = ImportKey::new("job", 1);
        holder.record_latest_loaded_position(&key, "job-index", 10).unwrap();
        assert_eq!(holder.record_latest_loaded_position(&key, "job-index", 10), Ok(10));
        assert_eq!(store.get(&key).unwrap().sequence, 1);
    }

    #[test]
    fn test_regression_rejected() {
        let (_, holder) = holder(RegressionPolicy::Reject);
        let key = ImportKey::new("incident", 2);
        holder.record_latest_loaded_position(&key, "incident-index", 40).unwrap();

        assert_eq!(
            holder.record_latest_loaded_position(&key, "incident-index", 39),
            Err(CheckpointError::PositionRegressionRejected {
                key: key.clone(),
                stored: 40,
                attempted: 39,
            })
        );
        assert_eq!(holder.get_key(&key), 40);
    }

    #[test]
    fn test_regression_clamped() {
        let (_, holder) = holder(RegressionPolicy::Clamp);
        let key = ImportKey::new("incident", 2);
        holder.record_latest_loaded_position(&key, "incident-index", 40).unwrap();
        assert_eq!(holder.record_latest_loaded_position(&key, "incident-index", 12), Ok(40));
        assert_eq!(holder.get_key(&key), 40);
    }

    #[test]
    fn test_failed_write_does_not_advance() {
        let store = Arc::new(FlakyStore::default());
        let holder = ImportPositionHolder::open(store.clone(), RegressionPolicy::Reject).unwrap();
        let key = ImportKey::new("job", 0);
        holder.record_latest_loaded_position(&key, "job-index", 5).unwrap();

        *store.fail.lock() = true;
        assert!(matches!(
            holder.record_latest_loaded_position(&key, "job-index", 9),
            Err(CheckpointError::Io(_))
        ));
        assert_eq!(holder.get_key(&key), 5);

        *store.fail.lock() = false;
        assert_eq!(holder.record_latest_loaded_position(&key, "job-index", 9), Ok(9));
    }

    #[test]
    fn test_reopen_from_file_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.json");
        let key = ImportKey::new("variable", 3);
        {
            let store = Arc::new(FilePositionStore::open(&path).unwrap());
            let holder = ImportPositionHolder::open(store, RegressionPolicy::Reject).unwrap();
            holder.record_latest_loaded_position(&key, "variable-index", 77).unwrap();
        }

        let store = Arc::new(FilePositionStore::open(&path).unwrap());
        let holder = ImportPositionHolder::open(store, RegressionPolicy::Reject).unwrap();
        assert_eq!(holder.get_key(&key), 77);
        assert_eq!(holder.snapshot().len(), 1);
        assert!(holder
            .record_latest_loaded_position(&key, "variable-index", 70)
            .is_err());
    }

    #[test]
    fn test_concurrent_writers_never_regress() {
        let (store, holder) = holder(RegressionPolicy::Clamp);
        let holder = Arc::new(holder);
        let key = ImportKey::new("job", 1);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let holder = Arc::clone(&holder);
                let key = key.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let target = i * 8 + t;
                        let effective = holder
                            .record_latest_loaded_position(&key, "job-index", target)
                            .unwrap();
                        assert!(effective >= target);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(holder.get_key(&key), 199 * 8 + 7);
        assert_eq!(store.get(&key).unwrap().position, 199 * 8 + 7);
    }

    /// Store whose first write for `gated` waits on the test.
    struct GatedStore {
        inner: MemoryPositionStore,
        gated: ValueType,
        entered: Barrier,
        release: Barrier,
    }

    impl PositionStore for GatedStore {
        fn load_all(&self) -> Result<Vec<ImportPosition>, CheckpointError> {
            self.inner.load_all()
        }

        fn store(&self, position: &ImportPosition) -> Result<(), CheckpointError> {
            if position.value_type == self.gated {
                self.entered.wait();
                self.release.wait();
            }
            self.inner.store(position)
        }
    }

    #[test]
    fn test_slow_store_write_blocks_only_its_pair() {
        let store = Arc::new(GatedStore {
            inner: MemoryPositionStore::new(),
            gated: ValueType::new("incident"),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });
        let holder =
            Arc::new(ImportPositionHolder::open(store.clone(), RegressionPolicy::Reject).unwrap());
        let slow = ImportKey::new("incident", 1);
        let fast = ImportKey::new("job", 1);

        let writer = {
            let holder = Arc::clone(&holder);
            let slow = slow.clone();
            std::thread::spawn(move || {
                holder.record_latest_loaded_position(&slow, "incident-index", 5)
            })
        };
        store.entered.wait();

        // The slow pair's write is in flight
        let (tx, rx) = mpsc::channel();
        {
            let holder = Arc::clone(&holder);
            let slow = slow.clone();
            let fast = fast.clone();
            std::thread::spawn(move || {
                let advanced = holder.record_latest_loaded_position(&fast, "job-index", 3);
                let _ = tx.send((advanced, holder.get_key(&slow), holder.snapshot().len()));
            });
        }
        let observed = rx.recv_timeout(Duration::from_secs(5));

        store.release.wait();
        assert_eq!(writer.join().unwrap(), Ok(5));

        // Not visible before the write is durable
        assert_eq!(observed, Ok((Ok(3), NO_POSITION, 1)));
        assert_eq!(holder.get_key(&slow), 5);
        assert_eq!(holder.get_key(&fast), 3);
    }

    #[test]
    fn test_policy_from_config_file() {
        let config: ImporterConfig = toml::from_str("regression_policy = \"clamp\"\n").unwrap();
        let holder =
            ImportPositionHolder::from_config(Arc::new(MemoryPositionStore::new()), &config)
                .unwrap();
        assert_eq!(holder.policy(), RegressionPolicy::Clamp);

        let key = ImportKey::new("job", 0);
        holder.record_latest_loaded_position(&key, "job-index", 20).unwrap();
        assert_eq!(holder.record_latest_loaded_position(&key, "job-index", 7), Ok(20));

        let strict = ImportPositionHolder::from_config(
            Arc::new(MemoryPositionStore::new()),
            &ImporterConfig::for_testing(),
        )
        .unwrap();
        strict.record_latest_loaded_position(&key, "job-index", 20).unwrap();
        assert!(strict
            .record_latest_loaded_position(&key, "job-index", 7)
            .is_err());
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let (_, holder) = holder(RegressionPolicy::Reject);
        for (vt, p) in [("job", 2), ("incident", 1), ("job", 1)] {
            holder
                .record_latest_loaded_position(&ImportKey::new(vt, p), vt, 1)
                .unwrap();
        }
        let keys: Vec<_> = holder.snapshot().iter().map(|p| p.key().to_string()).collect();
        assert_eq!(keys, vec!["incident/1", "job/1", "job/2"]);
    }

    proptest! {
        #[test]
        fn checkpoint_never_decreases(updates in prop::collection::vec(0i64..1_000, 1..64)) {
            let (_, holder) = holder(RegressionPolicy::Reject);
            let key = ImportKey::new("job", 1);
            let mut high = NO_POSITION;

            for position in updates {
                let result = holder.record_latest_loaded_position(&key, "job-index", position);
                if position >= high {
                    prop_assert_eq!(result, Ok(position));
                    high = position;
                } else {
                    prop_assert!(result.is_err());
                }
                prop_assert_eq!(holder.get_key(&key), high);
            }
        }
    }
}
