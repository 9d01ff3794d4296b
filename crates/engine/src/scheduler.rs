//! Import scheduler: scans partitions and dispatches jobs to workers.
//!
//! Each scheduling cycle walks every registered (value-type, partition)
//! pair, builds the next batch after the pair's checkpoint and hands it to
//! the worker pool. A pair is busy from dispatch until its job is terminal,
//! so at most one batch per pair is ever in flight and batches of a pair
//! are persisted in position order. Pairs are otherwise independent.
//!
//! A failed batch is dropped; the pair's checkpoint did not move, so the
//! next cycle scans the same records again. A rejected regression halts the
//! pair until [`ImportScheduler::resume_pair`] is called.

use crate::config::ImporterConfig;
use crate::error::{EngineError, SchedulerError};
use crate::job::{ImportJob, ImportOutcome};
use crate::pool::{PoolStats, WorkerPool};
use crate::position::ImportPositionHolder;
use crate::scanner::RecordScanner;
use crate::status::ImportStatusBoard;
use dashmap::{DashMap, DashSet};
use logsync_core::{ImportError, ImportKey, NoSuchRecord, StoreSink};
use logsync_executor::ResilientExecutor;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What one scheduling cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Batches handed to workers
    pub dispatched: usize,
    /// Pairs skipped because a batch was still in flight
    pub skipped_busy: usize,
    /// Pairs skipped because they are halted
    pub skipped_halted: usize,
    /// The worker queue filled up and the cycle stopped early
    pub backpressured: bool,
}

/// Scheduler metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Worker pool metrics
    pub pool: PoolStats,
    /// Jobs that persisted and checkpointed their batch
    pub batches_finished: u64,
    /// Jobs that failed
    pub batches_failed: u64,
    /// Records in finished batches
    pub records_imported: u64,
    /// Pairs currently halted
    pub halted_pairs: usize,
}

#[derive(Debug, Default)]
struct Counters {
    finished: AtomicU64,
    failed: AtomicU64,
    records: AtomicU64,
}

/// State shared between the dispatcher and the jobs it spawned.
#[derive(Debug, Default)]
struct PairTracker {
    busy: DashSet<ImportKey>,
    halted: DashMap<ImportKey, ImportError>,
}

/// Marks a pair idle when its job is done, even if the job panicked.
struct InFlightGuard {
    tracker: Arc<PairTracker>,
    key: ImportKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.busy.remove(&self.key);
    }
}

/// Drives the import pipeline for any number of partitions.
pub struct ImportScheduler {
    pool: WorkerPool,
    store: Arc<dyn StoreSink>,
    executor: ResilientExecutor,
    positions: Arc<ImportPositionHolder>,
    status: Arc<ImportStatusBoard>,
    scanners: Mutex<Vec<RecordScanner>>,
    tracker: Arc<PairTracker>,
    counters: Arc<Counters>,
    poll_interval: Duration,
}

impl ImportScheduler {
    /// Start the worker pool described by `config`.
    pub fn new(
        config: &ImporterConfig,
        store: Arc<dyn StoreSink>,
        positions: Arc<ImportPositionHolder>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let executor = ResilientExecutor::new(config.retry_policy()?);
        let pool = WorkerPool::new(config.worker_threads, config.max_queue_depth)
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        if positions.policy() != config.regression_policy {
            warn!(
                target: "logsync::scheduler",
                configured = ?config.regression_policy,
                holder = ?positions.policy(),
                "Position holder ignores the configured regression policy"
            );
        }
        info!(
            target: "logsync::scheduler",
            workers = config.worker_threads,
            max_queue_depth = config.max_queue_depth,
            max_batch_size = config.max_batch_size,
            "Import scheduler started"
        );
        Ok(ImportScheduler {
            pool,
            store,
            executor,
            positions,
            status: Arc::new(ImportStatusBoard::new()),
            scanners: Mutex::new(Vec::new()),
            tracker: Arc::new(PairTracker::default()),
            counters: Arc::new(Counters::default()),
            poll_interval: config.poll_interval(),
        })
    }

    /// Replace the executor jobs run under (builder pattern).
    pub fn with_executor(mut self, executor: ResilientExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Add a partition's scanner; its pairs take part from the next cycle.
    pub fn add_scanner(&self, scanner: RecordScanner) {
        for key in scanner.keys() {
            self.status.register(&key, self.positions.get_key(&key));
        }
        debug!(
            target: "logsync::scheduler",
            partition = scanner.partition(),
            pairs = scanner.keys().len(),
            "Registered partition"
        );
        self.scanners.lock().push(scanner);
    }

    /// Run one scheduling cycle.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShutDown`] once the scheduler has been shut down.
    /// A full queue is not an error; see [`CycleReport::backpressured`].
    pub fn run_cycle(&self) -> Result<CycleReport, SchedulerError> {
        if self.pool.is_shut_down() {
            return Err(SchedulerError::ShutDown);
        }
        let mut report = CycleReport::default();
        let mut scanners = self.scanners.lock();

        for scanner in scanners.iter_mut() {
            for key in scanner.keys() {
                if self.tracker.halted.contains_key(&key) {
                    report.skipped_halted += 1;
                    continue;
                }
                if self.tracker.busy.contains(&key) {
                    report.skipped_busy += 1;
                    continue;
                }

                let checkpoint = self.positions.get_key(&key);
                let batch = match scanner.scan(&key.value_type, checkpoint) {
                    Ok(batch) => batch,
                    Err(NoSuchRecord) => continue,
                };

                match self.dispatch(ImportJob::new(
                    batch,
                    Arc::clone(&self.store),
                    self.executor.clone(),
                    Arc::clone(&self.positions),
                )) {
                    Ok(()) => report.dispatched += 1,
                    Err(SchedulerError::Backpressure) => {
                        debug!(
                            target: "logsync::scheduler",
                            pair = %key,
                            "Worker queue full; deferring to next cycle"
                        );
                        report.backpressured = true;
                        return Ok(report);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(report)
    }

    fn dispatch(&self, mut job: ImportJob) -> Result<(), SchedulerError> {
        let key = job.batch().key().clone();
        self.tracker.busy.insert(key.clone());
        let guard = InFlightGuard {
            tracker: Arc::clone(&self.tracker),
            key: key.clone(),
        };
        let status = Arc::clone(&self.status);
        let tracker = Arc::clone(&self.tracker);
        let counters = Arc::clone(&self.counters);

        // On rejection the closure is dropped and the guard frees the pair
        self.pool.submit(move || {
            let _guard = guard;
            let outcome = job.run();
            record_outcome(&outcome, &status, &tracker, &counters);
        })
    }

    /// Run cycles until a cycle dispatches nothing or none of its jobs
    /// succeed, waiting for each cycle's jobs to finish.
    ///
    /// Returns the number of batches dispatched.
    pub fn run_until_caught_up(&self) -> Result<usize, SchedulerError> {
        let mut dispatched = 0;
        loop {
            let finished_before = self.counters.finished.load(Ordering::Acquire);
            let report = self.run_cycle()?;
            self.pool.drain();
            dispatched += report.dispatched;

            let progressed = self.counters.finished.load(Ordering::Acquire) > finished_before;
            if report.dispatched == 0 || !progressed {
                return Ok(dispatched);
            }
        }
    }

    /// Run cycles until `stop` is set or the scheduler shuts down, pausing
    /// for the configured poll interval after every idle cycle.
    pub fn run(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            match self.run_cycle() {
                Ok(report) if report.dispatched == 0 || report.backpressured => {
                    std::thread::sleep(self.poll_interval);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    /// Block until every dispatched job is terminal.
    pub fn drain(&self) {
        self.pool.drain();
    }

    /// Let queued and running jobs finish, stop the workers and close
    /// every reader. Idempotent.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        let mut scanners = self.scanners.lock();
        for scanner in scanners.iter_mut() {
            scanner.close();
        }
        info!(
            target: "logsync::scheduler",
            finished = self.counters.finished.load(Ordering::Relaxed),
            failed = self.counters.failed.load(Ordering::Relaxed),
            "Import scheduler stopped"
        );
    }

    /// Let a halted pair run again. Returns whether it was halted.
    pub fn resume_pair(&self, key: &ImportKey) -> bool {
        let resumed = self.tracker.halted.remove(key).is_some();
        if resumed {
            self.status.resume(key);
            info!(target: "logsync::scheduler", pair = %key, "Resumed halted pair");
        }
        resumed
    }

    /// Whether a pair is halted
    pub fn is_halted(&self, key: &ImportKey) -> bool {
        self.tracker.halted.contains_key(key)
    }

    /// Error that halted a pair
    pub fn halt_reason(&self, key: &ImportKey) -> Option<ImportError> {
        self.tracker.halted.get(key).map(|e| e.clone())
    }

    /// Every halted pair, ordered
    pub fn halted_pairs(&self) -> Vec<ImportKey> {
        let mut keys: Vec<ImportKey> = self.tracker.halted.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Whether a pair has a batch in flight
    pub fn is_busy(&self, key: &ImportKey) -> bool {
        self.tracker.busy.contains(key)
    }

    /// Per-pair status board
    pub fn status(&self) -> &Arc<ImportStatusBoard> {
        &self.status
    }

    /// Checkpoints
    pub fn positions(&self) -> &Arc<ImportPositionHolder> {
        &self.positions
    }

    /// Snapshot of scheduler metrics
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pool: self.pool.stats(),
            batches_finished: self.counters.finished.load(Ordering::Relaxed),
            batches_failed: self.counters.failed.load(Ordering::Relaxed),
            records_imported: self.counters.records.load(Ordering::Relaxed),
            halted_pairs: self.tracker.halted.len(),
        }
    }
}

fn record_outcome(
    outcome: &ImportOutcome,
    status: &ImportStatusBoard,
    tracker: &PairTracker,
    counters: &Counters,
) {
    status.record(outcome);
    match &outcome.result {
        Ok(_) => {
            counters.records.fetch_add(outcome.batch_len as u64, Ordering::Relaxed);
            counters.finished.fetch_add(1, Ordering::Release);
        }
        Err(e) => {
            if e.is_halting() {
                error!(
                    target: "logsync::scheduler",
                    pair = %outcome.key,
                    error = %e,
                    "Halting pair until resumed"
                );
                tracker.halted.insert(outcome.key.clone(), e.clone());
            } else {
                warn!(
                    target: "logsync::scheduler",
                    pair = %outcome.key,
                    error = %e,
                    "Batch failed; will retry from checkpoint"
                );
            }
            counters.failed.fetch_add(1, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for ImportScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportScheduler")
            .field("stats", &self.stats())
            .finish()
    }
}
