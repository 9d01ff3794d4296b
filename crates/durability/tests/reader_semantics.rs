//! Reader cursor semantics
//!
//! These tests pin down how a reader moves over a log:
//! - seek lands on the first record at or after the target
//! - seek_to_next_event consumes an exact anchor
//! - peeking never advances the cursor
//! - appends made after a reader exists become visible to it
//! - closed readers are inert

use logsync_core::{LogReader, LogRecord, NoSuchRecord, Position, NO_POSITION};
use logsync_durability::{Log, LogConfig};
use proptest::prelude::*;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use tempfile::TempDir;

const POSITIONS: [Position; 5] = [1, 3, 7, 8, 20];

fn record(position: Position) -> LogRecord {
    LogRecord::new(0, position, position * 100, "job", vec![position as u8; 24])
}

fn log_with(dir: &TempDir, positions: &[Position]) -> Log {
    let log = Log::open(dir.path(), 0, LogConfig::for_testing()).unwrap();
    for p in positions {
        log.append(&record(*p)).unwrap();
    }
    log
}

fn drain(reader: &mut impl LogReader) -> Vec<Position> {
    let mut out = Vec::new();
    while reader.has_next() {
        out.push(reader.next().unwrap().position);
    }
    out
}

#[test]
fn test_new_reader_starts_before_first_record() {
    let dir = TempDir::new().unwrap();
    let log = log_with(&dir, &POSITIONS);
    let mut reader = log.reader();

    assert_eq!(reader.position(), NO_POSITION);
    assert_eq!(drain(&mut reader), POSITIONS.to_vec());
    assert_eq!(reader.position(), 20);
    assert_eq!(reader.next(), Err(NoSuchRecord));
}

#[test]
fn test_seek_lands_on_first_record_at_or_after_target() {
    let dir = TempDir::new().unwrap();
    let log = log_with(&dir, &POSITIONS);
    let mut reader = log.reader();

    reader.seek(5);
    assert_eq!(reader.next().unwrap().position, 7);

    reader.seek(8);
    assert_eq!(reader.position(), 7);
    assert_eq!(reader.next().unwrap().position, 8);

    reader.seek(0);
    assert_eq!(reader.position(), NO_POSITION);
    assert_eq!(reader.next().unwrap().position, 1);

    reader.seek(21);
    assert!(!reader.has_next());
    assert_eq!(reader.position(), 20);
}

#[test]
fn test_seek_to_next_event_consumes_exact_anchor() {
    let dir = TempDir::new().unwrap();
    let log = log_with(&dir, &POSITIONS);
    let mut reader = log.reader();

    assert!(reader.seek_to_next_event(7));
    assert_eq!(reader.position(), 7);
    assert_eq!(reader.next().unwrap().position, 8);

    // Anchor missing but a later record exists
    assert!(reader.seek_to_next_event(4));
    assert_eq!(reader.next().unwrap().position, 7);
}

#[test]
fn test_seek_to_next_event_on_last_record() {
    let dir = TempDir::new().unwrap();
    let log = log_with(&dir, &POSITIONS);
    let mut reader = log.reader();

    assert!(reader.seek_to_next_event(20));
    assert_eq!(reader.position(), 20);
    assert!(!reader.has_next());

    assert!(!reader.seek_to_next_event(21));
    assert!(!reader.has_next());
}

#[test]
fn test_seek_to_next_event_negative_goes_to_first() {
    let dir = TempDir::new().unwrap();
    let log = log_with(&dir, &POSITIONS);
    let mut reader = log.reader();
    reader.seek_to_end();

    assert!(reader.seek_to_next_event(-1));
    assert_eq!(reader.next().unwrap().position, 1);
}

#[test]
fn test_seek_to_first_event_rewinds() {
    let dir = TempDir::new().unwrap();
    let log = log_with(&dir, &POSITIONS);
    let mut reader = log.reader();
    drain(&mut reader);

    reader.seek_to_first_event();
    assert_eq!(reader.position(), NO_POSITION);
    assert_eq!(drain(&mut reader), POSITIONS.to_vec());
}

#[test]
fn test_seek_to_end() {
    let dir = TempDir::new().unwrap();
    let empty = Log::open(dir.path().join("empty"), 0, LogConfig::for_testing()).unwrap();
    assert!(empty.reader().seek_to_end() < 0);

    let log = log_with(&dir, &POSITIONS);
    let mut reader = log.reader();
    assert_eq!(reader.seek_to_end(), 20);
    assert!(!reader.has_next());
}

#[test]
fn test_appends_become_visible_to_existing_reader() {
    let dir = TempDir::new().unwrap();
    let log = log_with(&dir, &POSITIONS);
    let mut reader = log.reader();
    reader.seek_to_end();
    assert!(!reader.has_next());

    log.append(&record(21)).unwrap();
    assert!(reader.has_next());
    assert_eq!(reader.next().unwrap().position, 21);

    // Reader created on an empty log
    let other = TempDir::new().unwrap();
    let log = Log::open(other.path(), 0, LogConfig::for_testing()).unwrap();
    let mut reader = log.reader();
    assert!(!reader.has_next());
    log.append(&record(1)).unwrap();
    assert!(reader.has_next());
}

#[test]
fn test_peek_does_not_advance() {
    let dir = TempDir::new().unwrap();
    let log = log_with(&dir, &POSITIONS);
    let mut reader = log.reader();

    let first = reader.peek_next().unwrap();
    assert_eq!(reader.peek_next().unwrap(), first);
    assert_eq!(reader.position(), NO_POSITION);
    assert_eq!(reader.next().unwrap(), first);
    assert_eq!(reader.peek_next().unwrap().position, 3);

    reader.seek_to_end();
    assert_eq!(reader.peek_next(), Err(NoSuchRecord));
}

#[test]
fn test_closed_reader_is_inert() {
    let dir = TempDir::new().unwrap();
    let log = log_with(&dir, &POSITIONS);
    let mut reader = log.reader();
    reader.next().unwrap();
    assert!(!reader.is_closed());

    reader.close();
    assert!(reader.is_closed());
    assert!(!reader.has_next());
    assert_eq!(reader.next(), Err(NoSuchRecord));
    assert_eq!(reader.peek_next(), Err(NoSuchRecord));
    assert_eq!(reader.position(), NO_POSITION);

    reader.seek(1);
    reader.seek_to_first_event();
    assert!(!reader.has_next());
    assert!(!reader.seek_to_next_event(1));
}

#[test]
fn test_readers_are_independent() {
    let dir = TempDir::new().unwrap();
    let log = log_with(&dir, &POSITIONS);
    let mut a = log.reader();
    let mut b = log.reader();

    a.seek(8);
    assert_eq!(b.next().unwrap().position, 1);
    assert_eq!(a.next().unwrap().position, 8);
}

#[test]
fn test_seeks_across_many_segments() {
    let dir = TempDir::new().unwrap();
    let positions: Vec<Position> = (1..=300).map(|i| i * 2).collect();
    let log = log_with(&dir, &positions);
    assert!(log.segment_count() > 5);

    let mut reader = log.reader();
    for target in [1, 2, 3, 101, 250, 599, 600] {
        reader.seek(target);
        let expected = positions.iter().copied().find(|p| *p >= target).unwrap();
        assert_eq!(reader.next().unwrap().position, expected, "seek({})", target);
    }
    reader.seek(601);
    assert!(!reader.has_next());
}

#[test]
fn test_reopened_log_seeks_through_sealed_segments() {
    let dir = TempDir::new().unwrap();
    let positions: Vec<Position> = (1..=200).collect();
    {
        log_with(&dir, &positions);
    }

    let log = Log::open(dir.path(), 0, LogConfig::for_testing()).unwrap();
    assert_eq!(log.last_position(), 200);
    assert_eq!(log.record_count(), 200);

    let mut reader = log.reader();
    assert!(reader.seek_to_next_event(57));
    assert_eq!(reader.next().unwrap().position, 58);
    assert_eq!(drain(&mut reader).len(), 142);
}

#[test]
fn test_partial_tail_is_truncated_on_reopen() {
    let dir = TempDir::new().unwrap();
    {
        log_with(&dir, &[1, 2, 3]);
    }
    let segment = dir.path().join("log-000001.seg");
    let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
    file.write_all(&[90, 0, 0, 0, 1, 2, 3]).unwrap();
    drop(file);

    let log = Log::open(dir.path(), 0, LogConfig::for_testing()).unwrap();
    assert_eq!(log.last_position(), 3);
    log.append(&record(4)).unwrap();
    assert_eq!(drain(&mut log.reader()), vec![1, 2, 3, 4]);
}

#[test]
fn test_corrupted_record_is_skipped() {
    let dir = TempDir::new().unwrap();
    {
        log_with(&dir, &[1, 2, 3]);
    }

    // Flip a payload byte of the second record
    let segment = dir.path().join("log-000001.seg");
    let frame_len = (std::fs::metadata(&segment).unwrap().len() - 40) / 3;
    let mut file = OpenOptions::new().read(true).write(true).open(&segment).unwrap();
    file.seek(SeekFrom::Start(40 + frame_len + 20)).unwrap();
    file.write_all(&[0xFF, 0xFF]).unwrap();
    drop(file);

    let log = Log::open(dir.path(), 0, LogConfig::for_testing()).unwrap();
    assert_eq!(drain(&mut log.reader()), vec![1, 3]);
}

#[test]
fn test_concurrent_writer_and_reader() {
    let dir = TempDir::new().unwrap();
    let log = Log::open(dir.path(), 0, LogConfig::for_testing()).unwrap();

    let writer = {
        let log = log.clone();
        std::thread::spawn(move || {
            for p in 1..=500 {
                log.append(&record(p)).unwrap();
            }
        })
    };

    let mut reader = log.reader();
    let mut seen = Vec::new();
    while seen.len() < 500 {
        if reader.has_next() {
            seen.push(reader.next().unwrap().position);
        } else {
            std::thread::yield_now();
        }
    }
    writer.join().unwrap();

    assert_eq!(seen, (1..=500).collect::<Vec<_>>());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn seek_returns_first_record_at_or_after_target(
        gaps in prop::collection::vec(1i64..10, 1..120),
        target in 0i64..700,
    ) {
        let dir = TempDir::new().unwrap();
        let positions: Vec<Position> = gaps
            .iter()
            .scan(0i64, |acc, g| { *acc += g; Some(*acc) })
            .collect();
        let log = log_with(&dir, &positions);

        let mut reader = log.reader();
        reader.seek(target);
        let expected = positions.iter().copied().find(|p| *p >= target);
        prop_assert_eq!(reader.next().ok().map(|r| r.position), expected);
    }
}
