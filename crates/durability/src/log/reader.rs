//! Cursor over a segmented log.
//!
//! Each reader keeps its own file handle and byte cursor. It consults the
//! shared segment table only to learn how far it may read and where a seek
//! should start, so readers never block the writer for longer than a table
//! lookup and records appended after a reader was created become visible
//! to it.

use super::scan::{read_frame_at, FrameRead};
use super::table::{start_from, Lookup};
use super::LogShared;
use crate::error::LogError;
use crate::format::{LogSegment, SEGMENT_HEADER_SIZE};
use logsync_core::{LogReader, LogRecord, NoSuchRecord, PartitionId, Position, NO_POSITION};
use std::fs::File;
use std::sync::Arc;
use tracing::warn;

/// Byte location of the next frame to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    segment: u64,
    offset: u64,
}

/// [`LogReader`] over a [`Log`](super::Log).
pub struct SegmentedLogReader {
    shared: Arc<LogShared>,
    cursor: Cursor,
    /// Position of the record just before the cursor
    position: Position,
    /// Record at the cursor and the cursor just past it
    peeked: Option<(LogRecord, Cursor)>,
    file: Option<(u64, File)>,
    closed: bool,
}

impl SegmentedLogReader {
    pub(crate) fn new(shared: Arc<LogShared>) -> Self {
        let first = shared.table.read().first_segment();
        SegmentedLogReader {
            shared,
            cursor: Cursor {
                segment: first,
                offset: SEGMENT_HEADER_SIZE as u64,
            },
            position: NO_POSITION,
            peeked: None,
            file: None,
            closed: false,
        }
    }

    /// Whether [`close`](LogReader::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read the record at the cursor, moving past segments that have been
    /// fully read and frames that are damaged.
    fn load_next(&mut self) -> Result<Option<(LogRecord, Cursor)>, LogError> {
        let mut cursor = self.cursor;
        loop {
            let (end, next_segment) = {
                let table = self.shared.table.read();
                (
                    table.end_offset(cursor.segment),
                    table.next_segment(cursor.segment),
                )
            };

            if let Some(end) = end {
                let mut frame = FrameRead::End;
                if cursor.offset < end {
                    frame = self.read_frame(cursor, end)?;
                }
                match frame {
                    FrameRead::Record(record, next) => {
                        self.cursor = cursor;
                        let after = Cursor {
                            segment: cursor.segment,
                            offset: next,
                        };
                        return Ok(Some((record, after)));
                    }
                    FrameRead::Corrupt { next } => {
                        cursor.offset = next;
                        continue;
                    }
                    FrameRead::End => {}
                }
            }

            match next_segment {
                Some(segment) => {
                    cursor = Cursor {
                        segment,
                        offset: SEGMENT_HEADER_SIZE as u64,
                    };
                }
                None => {
                    self.cursor = cursor;
                    return Ok(None);
                }
            }
        }
    }

    fn read_frame(&mut self, cursor: Cursor, end: u64) -> Result<FrameRead, LogError> {
        let reopen = !matches!(&self.file, Some((n, _)) if *n == cursor.segment);
        if reopen {
            let path = LogSegment::segment_path(&self.shared.dir, cursor.segment);
            self.file = Some((cursor.segment, File::open(path)?));
        }
        match self.file.as_mut() {
            Some((_, file)) => Ok(read_frame_at(
                file,
                cursor.offset,
                end,
                self.shared.partition,
            )?),
            None => Ok(FrameRead::End),
        }
    }

    /// Place the cursor before the first record with position >= `target`.
    fn seek_inner(&mut self, target: Position) -> Result<(), LogError> {
        let lookup = self.shared.table.read().locate(target);
        let (segment, offset, mut previous) = match lookup {
            Lookup::Sealed { segment, previous } => {
                let index = segment.index(&self.shared.dir, self.shared.config.index_interval)?;
                let (offset, previous) = start_from(index.floor(target), previous);
                (segment.number(), offset, previous)
            }
            Lookup::Active {
                segment_number,
                offset,
                previous,
            } => (segment_number, offset, previous),
            Lookup::End {
                segment_number,
                offset,
                last,
            } => {
                self.cursor = Cursor {
                    segment: segment_number,
                    offset,
                };
                self.position = last;
                return Ok(());
            }
        };

        self.cursor = Cursor { segment, offset };
        loop {
            match self.load_next()? {
                Some((record, after)) if record.position < target => {
                    previous = record.position;
                    self.cursor = after;
                }
                Some(found) => {
                    self.peeked = Some(found);
                    break;
                }
                None => break,
            }
        }
        self.position = previous;
        Ok(())
    }
}

impl LogReader for SegmentedLogReader {
    fn partition(&self) -> PartitionId {
        self.shared.partition
    }

    fn has_next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if self.peeked.is_some() {
            return true;
        }
        match self.load_next() {
            Ok(Some(found)) => {
                self.peeked = Some(found);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(
                    target: "logsync::log",
                    partition = self.shared.partition,
                    error = %e,
                    "Log read failed; treating as end of log"
                );
                false
            }
        }
    }

    fn next(&mut self) -> Result<LogRecord, NoSuchRecord> {
        if !self.has_next() {
            return Err(NoSuchRecord);
        }
        let (record, after) = self.peeked.take().ok_or(NoSuchRecord)?;
        self.cursor = after;
        self.position = record.position;
        Ok(record)
    }

    fn peek_next(&mut self) -> Result<LogRecord, NoSuchRecord> {
        if !self.has_next() {
            return Err(NoSuchRecord);
        }
        self.peeked
            .as_ref()
            .map(|(record, _)| record.clone())
            .ok_or(NoSuchRecord)
    }

    fn seek(&mut self, position: Position) {
        if self.closed {
            return;
        }
        self.peeked = None;
        if let Err(e) = self.seek_inner(position) {
            warn!(
                target: "logsync::log",
                partition = self.shared.partition,
                position,
                error = %e,
                "Seek failed; moving cursor to end of log"
            );
            self.seek_to_end();
        }
    }

    fn seek_to_first_event(&mut self) {
        if self.closed {
            return;
        }
        self.peeked = None;
        self.cursor = Cursor {
            segment: self.shared.table.read().first_segment(),
            offset: SEGMENT_HEADER_SIZE as u64,
        };
        self.position = NO_POSITION;
    }

    fn seek_to_end(&mut self) -> Position {
        if self.closed {
            return NO_POSITION;
        }
        self.peeked = None;
        let table = self.shared.table.read();
        self.cursor = Cursor {
            segment: table.active.number(),
            offset: table.active.end_offset,
        };
        self.position = table.last_position();
        self.position
    }

    fn seek_to_next_event(&mut self, position: Position) -> bool {
        if self.closed {
            return false;
        }
        if position < 0 {
            self.seek_to_first_event();
            return true;
        }
        self.seek(position);
        match self.peek_next() {
            Ok(record) if record.position == position => self.next().is_ok(),
            Ok(_) => true,
            Err(NoSuchRecord) => false,
        }
    }

    fn position(&self) -> Position {
        if self.closed {
            NO_POSITION
        } else {
            self.position
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.peeked = None;
        self.file = None;
        self.position = NO_POSITION;
    }
}
