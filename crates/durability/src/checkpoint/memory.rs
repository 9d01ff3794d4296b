//! In-memory position store.

use logsync_core::{CheckpointError, ImportKey, ImportPosition, PositionStore};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// [`PositionStore`] that keeps checkpoints in a map.
///
/// Nothing survives the process; sharing one instance between two holders
/// simulates a restart.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    positions: Mutex<BTreeMap<ImportKey, ImportPosition>>,
}

impl MemoryPositionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current checkpoint for `key`, if any.
    pub fn get(&self, key: &ImportKey) -> Option<ImportPosition> {
        self.positions.lock().get(key).cloned()
    }

    /// Number of stored checkpoints.
    pub fn len(&self) -> usize {
        self.positions.lock().len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.positions.lock().is_empty()
    }
}

impl PositionStore for MemoryPositionStore {
    fn load_all(&self) -> Result<Vec<ImportPosition>, CheckpointError> {
        Ok(self.positions.lock().values().cloned().collect())
    }

    fn store(&self, position: &ImportPosition) -> Result<(), CheckpointError> {
        self.positions
            .lock()
            .insert(position.key(), position.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_replaces_previous_value() {
        let store = MemoryPositionStore::new();
        let key = ImportKey::new("job", 1);

        store.store(&ImportPosition::new(&key, "job-index", 10)).unwrap();
        store.store(&ImportPosition::new(&key, "job-index", 20)).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).unwrap().position, 20);
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
