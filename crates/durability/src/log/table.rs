//! Committed extent of the log, shared between the writer and readers.
//!
//! The writer publishes each appended record here after its bytes are on
//! disk; readers only ever read bytes below a published end offset. The
//! table is held behind an `RwLock` that either side takes just long enough
//! for a lookup or an update, never across file I/O.

use super::index::{IndexEntry, SparseIndex};
use super::scan::scan_segment;
use crate::error::LogError;
use crate::format::{SegmentMeta, SEGMENT_HEADER_SIZE};
use logsync_core::{Position, NO_POSITION};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// A sealed, immutable segment.
#[derive(Debug)]
pub(crate) struct SealedSegment {
    pub meta: SegmentMeta,
    pub end_offset: u64,
    index: OnceLock<SparseIndex>,
}

impl SealedSegment {
    /// Seal a segment whose index is already known.
    pub fn with_index(meta: SegmentMeta, end_offset: u64, index: SparseIndex) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(index);
        SealedSegment {
            meta,
            end_offset,
            index: cell,
        }
    }

    /// Seal a segment known only from its `.meta` sidecar; the index is
    /// built on first seek into it.
    pub fn lazy(meta: SegmentMeta, end_offset: u64) -> Self {
        SealedSegment {
            meta,
            end_offset,
            index: OnceLock::new(),
        }
    }

    pub fn number(&self) -> u64 {
        self.meta.segment_number
    }

    pub fn index(&self, dir: &Path, interval: usize) -> Result<&SparseIndex, LogError> {
        if let Some(index) = self.index.get() {
            return Ok(index);
        }
        let scan = scan_segment(dir, self.number(), interval)?;
        Ok(self.index.get_or_init(|| scan.index))
    }
}

/// The segment currently being appended to.
#[derive(Debug)]
pub(crate) struct ActiveSegment {
    pub meta: SegmentMeta,
    pub end_offset: u64,
    pub index: SparseIndex,
}

impl ActiveSegment {
    pub fn empty(segment_number: u64, interval: usize) -> Self {
        ActiveSegment {
            meta: SegmentMeta::new_empty(segment_number),
            end_offset: SEGMENT_HEADER_SIZE as u64,
            index: SparseIndex::new(interval),
        }
    }

    pub fn number(&self) -> u64 {
        self.meta.segment_number
    }
}

/// Where a seek should start scanning.
pub(crate) enum Lookup {
    /// Target lies in a sealed segment
    Sealed {
        segment: Arc<SealedSegment>,
        previous: Position,
    },
    /// Target lies in the active segment
    Active {
        segment_number: u64,
        offset: u64,
        previous: Position,
    },
    /// Target is past every committed record
    End {
        segment_number: u64,
        offset: u64,
        last: Position,
    },
}

/// Sealed segments (non-empty, ascending) plus the active segment.
#[derive(Debug)]
pub(crate) struct SegmentTable {
    pub sealed: Vec<Arc<SealedSegment>>,
    pub active: ActiveSegment,
}

impl SegmentTable {
    pub fn first_segment(&self) -> u64 {
        self.sealed
            .first()
            .map(|s| s.number())
            .unwrap_or_else(|| self.active.number())
    }

    pub fn first_position(&self) -> Position {
        match self.sealed.first() {
            Some(s) => s.meta.first_position,
            None => self.active.meta.first_position,
        }
    }

    pub fn last_position(&self) -> Position {
        if !self.active.meta.is_empty() {
            return self.active.meta.last_position;
        }
        self.sealed_last_position()
    }

    fn sealed_last_position(&self) -> Position {
        self.sealed
            .last()
            .map(|s| s.meta.last_position)
            .unwrap_or(NO_POSITION)
    }

    pub fn record_count(&self) -> u64 {
        self.sealed.iter().map(|s| s.meta.record_count).sum::<u64>() + self.active.meta.record_count
    }

    pub fn segment_count(&self) -> usize {
        self.sealed.len() + 1
    }

    /// Committed end offset of a segment, if the table knows it.
    pub fn end_offset(&self, segment_number: u64) -> Option<u64> {
        if segment_number == self.active.number() {
            return Some(self.active.end_offset);
        }
        self.sealed
            .binary_search_by_key(&segment_number, |s| s.number())
            .ok()
            .map(|i| self.sealed[i].end_offset)
    }

    /// Smallest known segment number greater than `segment_number`.
    pub fn next_segment(&self, segment_number: u64) -> Option<u64> {
        let idx = self.sealed.partition_point(|s| s.number() <= segment_number);
        match self.sealed.get(idx) {
            Some(s) => Some(s.number()),
            None if self.active.number() > segment_number => Some(self.active.number()),
            None => None,
        }
    }

    /// Find the segment holding the first record with position >= `target`.
    pub fn locate(&self, target: Position) -> Lookup {
        let idx = self
            .sealed
            .partition_point(|s| s.meta.last_position < target);
        if let Some(segment) = self.sealed.get(idx) {
            let previous = idx
                .checked_sub(1)
                .map(|i| self.sealed[i].meta.last_position)
                .unwrap_or(NO_POSITION);
            return Lookup::Sealed {
                segment: Arc::clone(segment),
                previous,
            };
        }

        let previous = self.sealed_last_position();
        if !self.active.meta.is_empty() && self.active.meta.last_position >= target {
            let (offset, previous) = start_from(self.active.index.floor(target), previous);
            return Lookup::Active {
                segment_number: self.active.number(),
                offset,
                previous,
            };
        }

        Lookup::End {
            segment_number: self.active.number(),
            offset: self.active.end_offset,
            last: self.last_position(),
        }
    }
}

/// Byte offset to start scanning from and the position preceding it.
pub(crate) fn start_from(entry: Option<IndexEntry>, segment_previous: Position) -> (u64, Position) {
    match entry {
        Some(e) if e.previous != NO_POSITION => (e.offset, e.previous),
        Some(e) => (e.offset, segment_previous),
        None => (SEGMENT_HEADER_SIZE as u64, segment_previous),
    }
}
