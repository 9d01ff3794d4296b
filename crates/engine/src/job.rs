//! Import Job: persist one batch, then advance its pair's checkpoint.
//!
//! The checkpoint moves strictly after the store accepted the batch. A crash
//! between the two steps re-delivers the batch on restart, which is why
//! [`StoreSink::bulk_apply`] must be idempotent.

use crate::batch::ImportBatch;
use crate::position::ImportPositionHolder;
use logsync_core::{ImportError, ImportKey, ImportResult, Position, StoreSink};
use logsync_executor::ResilientExecutor;
use std::sync::Arc;
use tracing::{debug, error};

/// Result of running one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Pair the batch belonged to
    pub key: ImportKey,
    /// Number of records in the batch
    pub batch_len: usize,
    /// Position of the batch's last record
    pub last_position: Position,
    /// Producer timestamp of the batch's last record
    pub last_timestamp: u64,
    /// Checkpoint in effect after the job, or why the job failed
    pub result: ImportResult<Position>,
}

impl ImportOutcome {
    /// Whether the batch was persisted and checkpointed
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Whether the failure must halt the pair
    pub fn is_halted(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_halting())
    }
}

/// One batch on its way into the store.
pub struct ImportJob {
    batch: ImportBatch,
    store: Arc<dyn StoreSink>,
    executor: ResilientExecutor,
    positions: Arc<ImportPositionHolder>,
}

impl ImportJob {
    /// Create a job for `batch`.
    pub fn new(
        batch: ImportBatch,
        store: Arc<dyn StoreSink>,
        executor: ResilientExecutor,
        positions: Arc<ImportPositionHolder>,
    ) -> Self {
        ImportJob {
            batch,
            store,
            executor,
            positions,
        }
    }

    /// The batch and its current state
    pub fn batch(&self) -> &ImportBatch {
        &self.batch
    }

    /// Give the batch back, e.g. to inspect its final state.
    pub fn into_batch(self) -> ImportBatch {
        self.batch
    }

    /// Persist the batch and advance the checkpoint.
    ///
    /// Never panics and never returns early: every failure is reported in
    /// the outcome and leaves the batch `failed` with the checkpoint where
    /// it was.
    pub fn run(&mut self) -> ImportOutcome {
        let result = self.import();
        match &result {
            Ok(checkpoint) => {
                self.batch.finished();
                debug!(
                    target: "logsync::job",
                    pair = %self.batch.key(),
                    records = self.batch.len(),
                    checkpoint,
                    "Import batch finished"
                );
            }
            Err(e) => {
                self.batch.failed();
                error!(
                    target: "logsync::job",
                    pair = %self.batch.key(),
                    records = self.batch.len(),
                    first = self.batch.first_position(),
                    last = self.batch.last_position(),
                    error = %e,
                    "Import batch failed"
                );
            }
        }

        ImportOutcome {
            key: self.batch.key().clone(),
            batch_len: self.batch.len(),
            last_position: self.batch.last_position(),
            last_timestamp: self.batch.last_timestamp(),
            result,
        }
    }

    fn import(&self) -> Result<Position, ImportError> {
        let batch = &self.batch;
        let operation = format!("BulkApply {} -> {}", batch.key(), batch.routing_key());
        self.executor.execute(&operation, || {
            self.store.bulk_apply(batch.routing_key(), batch.records())
        })?;

        let checkpoint = self.positions.record_latest_loaded_position(
            batch.key(),
            batch.routing_key(),
            batch.last_position(),
        )?;
        Ok(checkpoint)
    }
}

impl std::fmt::Debug for ImportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportJob")
            .field("pair", self.batch.key())
            .field("records", &self.batch.len())
            .field("state", &self.batch.state())
            .finish()
    }
}
