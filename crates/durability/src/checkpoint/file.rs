//! File-backed position store.
//!
//! All checkpoints live in one JSON document. Every `store` rewrites the
//! document with write-fsync-rename followed by a parent directory sync, so
//! a crash leaves either the old or the new document, never a torn one.

use logsync_core::{CheckpointError, ImportKey, ImportPosition, PositionStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Current version of the checkpoint document.
pub const CHECKPOINT_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    positions: Vec<ImportPosition>,
}

/// [`PositionStore`] persisted to a single JSON file.
#[derive(Debug)]
pub struct FilePositionStore {
    path: PathBuf,
    positions: Mutex<BTreeMap<ImportKey, ImportPosition>>,
}

impl FilePositionStore {
    /// Open the store at `path`, loading any existing checkpoints.
    ///
    /// A missing file is an empty store; the parent directory is created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let positions = Self::read_file(&path)?
            .into_iter()
            .map(|p| (p.key(), p))
            .collect();
        Ok(FilePositionStore {
            path,
            positions: Mutex::new(positions),
        })
    }

    /// Path of the checkpoint document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(path: &Path) -> Result<Vec<ImportPosition>, CheckpointError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e)),
        };
        let file: CheckpointFile = serde_json::from_slice(&data)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        if file.version != CHECKPOINT_FILE_VERSION {
            return Err(CheckpointError::Serialization(format!(
                "unsupported checkpoint file version {}",
                file.version
            )));
        }
        Ok(file.positions)
    }

    fn write_file(&self, positions: &BTreeMap<ImportKey, ImportPosition>) -> Result<(), CheckpointError> {
        let document = CheckpointFile {
            version: CHECKPOINT_FILE_VERSION,
            positions: positions.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(io_error)?;
        file.write_all(&bytes).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        drop(file);

        std::fs::rename(&temp_path, &self.path).map_err(io_error)?;

        if let Some(parent) = self.path.parent() {
            if parent.exists() {
                File::open(parent)
                    .and_then(|dir| dir.sync_all())
                    .map_err(io_error)?;
            }
        }
        Ok(())
    }
}

impl PositionStore for FilePositionStore {
    fn load_all(&self) -> Result<Vec<ImportPosition>, CheckpointError> {
        Ok(self.positions.lock().values().cloned().collect())
    }

    fn store(&self, position: &ImportPosition) -> Result<(), CheckpointError> {
        let mut positions = self.positions.lock();
        let previous = positions.insert(position.key(), position.clone());
        if let Err(e) = self.write_file(&positions) {
            // Keep memory in line with what is on disk
            match previous {
                Some(prev) => positions.insert(position.key(), prev),
                None => positions.remove(&position.key()),
            };
            return Err(e);
        }
        Ok(())
    }
}

fn io_error(e: std::io::Error) -> CheckpointError {
    CheckpointError::Io(e.to_string())
}
