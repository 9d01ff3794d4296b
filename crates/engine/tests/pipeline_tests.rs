//! Import pipeline integration tests
//!
//! Real segmented logs on disk, the in-memory store, and the scheduler's
//! worker pool. Covers pair isolation, failure handling and halting.

use logsync_core::{
    ImportError, ImportKey, LogRecord, StoreError, StoreSink, TaskHandle, TaskSpec, TaskStatus,
};
use logsync_durability::{FilePositionStore, Log, LogConfig, MemoryPositionStore};
use logsync_engine::{
    ImportPositionHolder, ImportScheduler, ImporterConfig, MemoryStore, PairOutcome,
    RecordScanner, RegressionPolicy,
};
use logsync_executor::{NoopObserver, ResilientExecutor, RetryPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn executor() -> ResilientExecutor {
    ResilientExecutor::new(RetryPolicy::for_testing()).with_observer(Arc::new(NoopObserver))
}

fn holder() -> Arc<ImportPositionHolder> {
    Arc::new(
        ImportPositionHolder::open(Arc::new(MemoryPositionStore::new()), RegressionPolicy::Reject)
            .unwrap(),
    )
}

fn scheduler(store: Arc<dyn StoreSink>, positions: Arc<ImportPositionHolder>) -> ImportScheduler {
    ImportScheduler::new(&ImporterConfig::for_testing(), store, positions)
        .unwrap()
        .with_executor(executor())
}

/// Partition 0: jobs at odd positions, incidents at even ones, keys
/// offset by 1000 for incidents.
fn mixed_log(dir: &TempDir, records: i64) -> Log {
    let log = Log::open(dir.path().join("p0"), 0, LogConfig::for_testing()).unwrap();
    for p in 1..=records {
        let (value_type, key) = if p % 2 == 1 { ("job", p) } else { ("incident", 1000 + p) };
        log.append(&LogRecord::new(0, p, key, value_type, vec![p as u8]))
            .unwrap();
    }
    log
}

fn job_log(dir: &TempDir, partition: u32, records: i64, key_offset: i64) -> Log {
    let log = Log::open(
        dir.path().join(format!("p{}", partition)),
        partition,
        LogConfig::for_testing(),
    )
    .unwrap();
    for p in 1..=records {
        log.append(&LogRecord::new(partition, p, key_offset + p, "job", vec![]))
            .unwrap();
    }
    log
}

fn mixed_scanner(log: &Log) -> RecordScanner {
    RecordScanner::new(Box::new(log.reader()), 4)
        .with_value_type("job", "job-index")
        .with_value_type("incident", "incident-index")
}

#[test]
fn test_imports_every_value_type_in_order() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let log = mixed_log(&dir, 20);
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(store.clone(), holder());
    scheduler.add_scanner(mixed_scanner(&log));

    scheduler.run_until_caught_up().unwrap();

    assert_eq!(scheduler.positions().get_key(&ImportKey::new("job", 0)), 19);
    assert_eq!(scheduler.positions().get_key(&ImportKey::new("incident", 0)), 20);
    assert_eq!(store.count_documents("job-index"), 10);
    assert_eq!(store.count_documents("incident-index"), 10);
    for document in store.documents("job-index") {
        assert_eq!(document.position % 2, 1);
        assert_eq!(document.key, document.position);
    }

    let stats = scheduler.stats();
    // 10 records per type in batches of 4
    assert_eq!(stats.batches_finished, 6);
    assert_eq!(stats.batches_failed, 0);
    assert_eq!(stats.records_imported, 20);
    scheduler.shutdown();
}

#[test]
fn test_partial_failure_applies_nothing() {
    let dir = TempDir::new().unwrap();
    let log = job_log(&dir, 0, 8, 0);
    let store = Arc::new(MemoryStore::new());
    store.reject_key(3);
    let scheduler = scheduler(store.clone(), holder());
    scheduler.add_scanner(RecordScanner::new(Box::new(log.reader()), 4).with_value_type("job", "job-index"));
    let key = ImportKey::new("job", 0);

    scheduler.run_cycle().unwrap();
    scheduler.drain();

    // The whole batch 1..=4 was refused, not just record 3
    assert_eq!(store.count_documents("job-index"), 0);
    assert_eq!(scheduler.positions().get_key(&key), -1);
    assert!(!scheduler.is_halted(&key));
    let status = scheduler.status().get(&key).unwrap();
    assert_eq!(status.last_outcome, PairOutcome::Failed);
    assert_eq!(status.consecutive_failures, 1);
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("fatal apply error")));

    // The same batch comes back once the store accepts it
    store.accept_key(3);
    scheduler.run_until_caught_up().unwrap();
    assert_eq!(store.count_documents("job-index"), 8);
    assert_eq!(scheduler.positions().get_key(&key), 8);
    let status = scheduler.status().get(&key).unwrap();
    assert_eq!(status.last_outcome, PairOutcome::Finished);
    assert_eq!(status.consecutive_failures, 0);
    scheduler.shutdown();
}

#[test]
fn test_transient_failures_are_absorbed_by_retries() {
    let dir = TempDir::new().unwrap();
    let log = job_log(&dir, 0, 4, 0);
    let store = Arc::new(MemoryStore::new());
    store.fail_next(2, StoreError::transient("connection reset"));
    let scheduler = scheduler(store.clone(), holder());
    scheduler.add_scanner(RecordScanner::new(Box::new(log.reader()), 4).with_value_type("job", "job-index"));

    scheduler.run_until_caught_up().unwrap();

    assert_eq!(store.apply_calls(), 3);
    assert_eq!(store.count_documents("job-index"), 4);
    assert_eq!(scheduler.stats().batches_failed, 0);
    scheduler.shutdown();
}

#[test]
fn test_failing_pair_does_not_block_others() {
    let dir = TempDir::new().unwrap();
    let p0 = mixed_log(&dir, 12);
    let p1 = job_log(&dir, 1, 12, 100);
    let store = Arc::new(MemoryStore::new());
    // Job at position 3 of partition 0 is refused forever
    store.reject_key(3);
    let scheduler = scheduler(store.clone(), holder());
    scheduler.add_scanner(mixed_scanner(&p0));
    scheduler.add_scanner(RecordScanner::new(Box::new(p1.reader()), 4).with_value_type("job", "job-index"));

    scheduler.run_until_caught_up().unwrap();

    let positions = scheduler.positions();
    assert_eq!(positions.get_key(&ImportKey::new("job", 0)), -1);
    assert_eq!(positions.get_key(&ImportKey::new("incident", 0)), 12);
    assert_eq!(positions.get_key(&ImportKey::new("job", 1)), 12);
    assert_eq!(store.count_documents("incident-index"), 6);
    // Only partition 1's jobs made it
    assert!(store.documents("job-index").iter().all(|d| d.key > 100));
    assert_eq!(store.count_documents("job-index"), 12);

    let failing = scheduler.status().get(&ImportKey::new("job", 0)).unwrap();
    assert!(failing.consecutive_failures >= 1);
    assert_eq!(failing.records_imported, 0);
    scheduler.shutdown();
}

#[test]
fn test_externally_advanced_checkpoint_skips_imported_records() {
    let dir = TempDir::new().unwrap();
    let log = mixed_log(&dir, 16);
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(store.clone(), holder());
    scheduler.add_scanner(mixed_scanner(&log));
    let job = ImportKey::new("job", 0);
    let incident = ImportKey::new("incident", 0);

    scheduler.run_cycle().unwrap();
    scheduler.drain();
    assert_eq!(scheduler.positions().get_key(&job), 7);
    assert_eq!(scheduler.positions().get_key(&incident), 8);

    // Another importer already loaded every job
    scheduler
        .positions()
        .record_latest_loaded_position(&job, "job-index", 15)
        .unwrap();
    scheduler.run_until_caught_up().unwrap();

    assert_eq!(scheduler.positions().get_key(&job), 15);
    assert_eq!(scheduler.positions().get_key(&incident), 16);
    assert_eq!(store.count_documents("job-index"), 4);
    assert_eq!(store.count_documents("incident-index"), 8);
    assert!(scheduler.halted_pairs().is_empty());
    scheduler.shutdown();
}

/// Store that moves a checkpoint forward from inside `bulk_apply`, so the
/// job's own checkpoint write arrives late and lower.
struct OvertakingStore {
    inner: MemoryStore,
    positions: Arc<ImportPositionHolder>,
    overtaken: AtomicBool,
}

impl StoreSink for OvertakingStore {
    fn bulk_apply(&self, collection: &str, records: &[LogRecord]) -> Result<(), StoreError> {
        self.inner.bulk_apply(collection, records)?;
        if collection == "job-index" && !self.overtaken.swap(true, Ordering::SeqCst) {
            let last = records.last().map(|r| r.position).unwrap_or(0);
            self.positions
                .record_latest_loaded_position(&ImportKey::new("job", 0), "job-index", last + 2)
                .map_err(|e| StoreError::fatal(e.to_string()))?;
        }
        Ok(())
    }

    fn count(&self, collection: &str) -> Result<u64, StoreError> {
        self.inner.count(collection)
    }

    fn submit_long_task(&self, spec: &TaskSpec) -> Result<TaskHandle, StoreError> {
        self.inner.submit_long_task(spec)
    }

    fn poll_task(&self, handle: &TaskHandle) -> Result<Option<TaskStatus>, StoreError> {
        self.inner.poll_task(handle)
    }

    fn delete_task(&self, handle: &TaskHandle) -> Result<(), StoreError> {
        self.inner.delete_task(handle)
    }
}

#[test]
fn test_rejected_regression_halts_only_its_pair() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let log = mixed_log(&dir, 24);
    let positions = holder();
    let store = Arc::new(OvertakingStore {
        inner: MemoryStore::new(),
        positions: Arc::clone(&positions),
        overtaken: AtomicBool::new(false),
    });
    let scheduler = scheduler(store.clone(), positions);
    scheduler.add_scanner(mixed_scanner(&log));
    let job = ImportKey::new("job", 0);
    let incident = ImportKey::new("incident", 0);

    // Job batch 1,3,5,7 lands; the store has meanwhile moved the checkpoint
    // to 9, so recording 7 would regress
    scheduler.run_until_caught_up().unwrap();

    assert!(scheduler.is_halted(&job));
    assert_eq!(
        scheduler.halt_reason(&job),
        Some(ImportError::PositionRegressionRejected {
            key: job.clone(),
            stored: 9,
            attempted: 7,
        })
    );
    assert_eq!(scheduler.halted_pairs(), vec![job.clone()]);
    assert_eq!(scheduler.positions().get_key(&job), 9);
    // The other pair of the same partition kept going
    assert_eq!(scheduler.positions().get_key(&incident), 24);
    assert_eq!(
        scheduler.status().get(&job).unwrap().last_outcome,
        PairOutcome::Halted
    );

    let report = scheduler.run_cycle().unwrap();
    assert_eq!(report.skipped_halted, 1);
    assert_eq!(report.dispatched, 0);

    assert!(scheduler.resume_pair(&job));
    assert!(!scheduler.resume_pair(&job));
    scheduler.run_until_caught_up().unwrap();
    assert_eq!(scheduler.positions().get_key(&job), 23);
    // Position 9 was claimed by the foreign writer and is never re-sent
    assert!(store.inner.document("job-index", 9).is_none());
    assert_eq!(store.inner.count_documents("job-index"), 11);
    assert_eq!(scheduler.stats().halted_pairs, 0);
    scheduler.shutdown();
}

#[test]
fn test_clamp_policy_keeps_pair_running() {
    let dir = TempDir::new().unwrap();
    let log = mixed_log(&dir, 24);
    let positions = Arc::new(
        ImportPositionHolder::open(Arc::new(MemoryPositionStore::new()), RegressionPolicy::Clamp)
            .unwrap(),
    );
    let store = Arc::new(OvertakingStore {
        inner: MemoryStore::new(),
        positions: Arc::clone(&positions),
        overtaken: AtomicBool::new(false),
    });
    let scheduler = scheduler(store.clone(), positions);
    scheduler.add_scanner(mixed_scanner(&log));
    let job = ImportKey::new("job", 0);

    scheduler.run_until_caught_up().unwrap();

    assert!(!scheduler.is_halted(&job));
    assert_eq!(scheduler.positions().get_key(&job), 23);
    assert_eq!(scheduler.stats().batches_failed, 0);
    scheduler.shutdown();
}

#[test]
fn test_shutdown_rejects_further_cycles() {
    let dir = TempDir::new().unwrap();
    let log = job_log(&dir, 0, 4, 0);
    let scheduler = scheduler(Arc::new(MemoryStore::new()), holder());
    scheduler.add_scanner(RecordScanner::new(Box::new(log.reader()), 4).with_value_type("job", "job-index"));

    scheduler.shutdown();
    scheduler.shutdown();
    assert!(scheduler.run_cycle().is_err());
    assert!(scheduler.run_until_caught_up().is_err());
}

#[test]
fn test_end_to_end_with_config_file_and_live_writers() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("logsync.toml");
    std::fs::write(
        &config_path,
        r#"
worker_threads = 3
max_queue_depth = 8
max_batch_size = 16
poll_interval_ms = 2

[retry]
max_attempts = 5
delay_ms = 0

[log]
segment_size = 2048
index_interval = 8
durability = "always"
"#,
    )
    .unwrap();
    let config = ImporterConfig::from_file(&config_path).unwrap();
    let log_config = config.log_config().unwrap();

    let p0 = Log::open(dir.path().join("p0"), 0, log_config.clone()).unwrap();
    let p1 = Log::open(dir.path().join("p1"), 1, log_config).unwrap();
    let positions = Arc::new(
        ImportPositionHolder::from_config(
            Arc::new(FilePositionStore::open(dir.path().join("positions.json")).unwrap()),
            &config,
        )
        .unwrap(),
    );
    let store = Arc::new(MemoryStore::new());
    store.fail_next(3, StoreError::transient("store warming up"));
    let scheduler = Arc::new(
        ImportScheduler::new(&config, store.clone(), Arc::clone(&positions))
            .unwrap()
            .with_executor(executor().with_max_attempts(5)),
    );
    for log in [&p0, &p1] {
        scheduler.add_scanner(
            RecordScanner::new(Box::new(log.reader()), config.max_batch_size)
                .with_value_type("job", "job-index")
                .with_value_type("incident", "incident-index"),
        );
    }

    let stop = Arc::new(AtomicBool::new(false));
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || scheduler.run(&stop))
    };

    let writers: Vec<_> = [(p0.clone(), 0i64), (p1.clone(), 10_000i64)]
        .into_iter()
        .map(|(log, offset)| {
            std::thread::spawn(move || {
                for i in 1..=150i64 {
                    let value_type = if i % 3 == 0 { "incident" } else { "job" };
                    log.append_next(offset + i, value_type, vec![]).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let expected = [
        (ImportKey::new("job", 0), 149),
        (ImportKey::new("incident", 0), 150),
        (ImportKey::new("job", 1), 149),
        (ImportKey::new("incident", 1), 150),
    ];
    let deadline = Instant::now() + Duration::from_secs(30);
    while expected
        .iter()
        .any(|(key, last)| positions.get_key(key) != *last)
    {
        assert!(Instant::now() < deadline, "import did not catch up");
        std::thread::sleep(Duration::from_millis(5));
    }

    stop.store(true, Ordering::Release);
    runner.join().unwrap();
    scheduler.shutdown();

    assert_eq!(store.count_documents("job-index"), 200);
    assert_eq!(store.count_documents("incident-index"), 100);
    assert_eq!(scheduler.stats().batches_failed, 0);
    assert!(scheduler.halted_pairs().is_empty());

    // Checkpoints survive in the file store
    let reopened = ImportPositionHolder::open(
        Arc::new(FilePositionStore::open(dir.path().join("positions.json")).unwrap()),
        RegressionPolicy::Reject,
    )
    .unwrap();
    for (key, last) in &expected {
        assert_eq!(reopened.get_key(key), *last);
    }
    let snapshot = scheduler.status().snapshot();
    assert_eq!(snapshot.len(), 4);
    assert!(snapshot.iter().all(|s| s.last_outcome == PairOutcome::Finished));
}
