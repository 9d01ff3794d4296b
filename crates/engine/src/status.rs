//! Per-pair import status for operators and monitoring.

use crate::job::ImportOutcome;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use logsync_core::{ImportKey, Position, NO_POSITION};
use serde::Serialize;

/// How the last job of a pair ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PairOutcome {
    /// No job has run yet
    Never,
    /// Last batch was persisted and checkpointed
    Finished,
    /// Last batch failed; the next cycle retries from the checkpoint
    Failed,
    /// A regression was rejected; no job runs until the pair is resumed
    Halted,
}

/// Status of one (value-type, partition) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairStatus {
    /// The pair
    pub key: ImportKey,
    /// Checkpointed position
    pub checkpoint: Position,
    /// How the last job ended
    pub last_outcome: PairOutcome,
    /// When the checkpoint last advanced
    pub last_success: Option<DateTime<Utc>>,
    /// Message of the last failure, cleared on success
    pub last_error: Option<String>,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Producer timestamp (micros) of the last imported record
    pub last_record_timestamp: Option<u64>,
    /// Batches imported since startup
    pub batches_imported: u64,
    /// Records imported since startup
    pub records_imported: u64,
}

impl PairStatus {
    fn new(key: ImportKey, checkpoint: Position) -> Self {
        PairStatus {
            key,
            checkpoint,
            last_outcome: PairOutcome::Never,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            last_record_timestamp: None,
            batches_imported: 0,
            records_imported: 0,
        }
    }

    /// Time since the checkpoint last advanced, `None` if it never has.
    pub fn lag(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_success.map(|at| now - at)
    }

    /// Age of the newest imported record, from its producer timestamp.
    pub fn record_lag(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let micros = i64::try_from(self.last_record_timestamp?).ok()?;
        let produced = Utc.timestamp_micros(micros).single()?;
        Some(now - produced)
    }
}

/// Board of every pair's [`PairStatus`], updated by the scheduler.
#[derive(Debug, Default)]
pub struct ImportStatusBoard {
    pairs: DashMap<ImportKey, PairStatus>,
}

impl ImportStatusBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a pair at `checkpoint`; a known pair is left as is.
    pub fn register(&self, key: &ImportKey, checkpoint: Position) {
        self.pairs
            .entry(key.clone())
            .or_insert_with(|| PairStatus::new(key.clone(), checkpoint));
    }

    /// Fold a job outcome into the pair's status.
    pub fn record(&self, outcome: &ImportOutcome) {
        let mut status = self
            .pairs
            .entry(outcome.key.clone())
            .or_insert_with(|| PairStatus::new(outcome.key.clone(), NO_POSITION));

        match &outcome.result {
            Ok(checkpoint) => {
                status.checkpoint = *checkpoint;
                status.last_outcome = PairOutcome::Finished;
                status.last_success = Some(Utc::now());
                status.last_error = None;
                status.consecutive_failures = 0;
                status.last_record_timestamp = Some(outcome.last_timestamp);
                status.batches_imported += 1;
                status.records_imported += outcome.batch_len as u64;
            }
            Err(e) => {
                status.last_outcome = if e.is_halting() {
                    PairOutcome::Halted
                } else {
                    PairOutcome::Failed
                };
                status.last_error = Some(e.to_string());
                status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            }
        }
    }

    /// Clear a halt after operator intervention.
    pub fn resume(&self, key: &ImportKey) {
        if let Some(mut status) = self.pairs.get_mut(key) {
            if status.last_outcome == PairOutcome::Halted {
                status.last_outcome = PairOutcome::Failed;
            }
        }
    }

    /// Status of one pair
    pub fn get(&self, key: &ImportKey) -> Option<PairStatus> {
        self.pairs.get(key).map(|s| s.clone())
    }

    /// Every pair's status, ordered by pair
    pub fn snapshot(&self) -> Vec<PairStatus> {
        let mut all: Vec<PairStatus> = self.pairs.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Pairs whose checkpoint has not advanced for longer than `threshold`.
    ///
    /// Pairs that never succeeded count as stalled once they have failed.
    pub fn stalled(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Vec<ImportKey> {
        self.snapshot()
            .into_iter()
            .filter(|s| match s.lag(now) {
                Some(lag) => lag > threshold && s.last_outcome != PairOutcome::Finished,
                None => s.consecutive_failures > 0 || s.last_outcome == PairOutcome::Halted,
            })
            .map(|s| s.key)
            .collect()
    }
}
