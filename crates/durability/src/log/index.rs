//! Sparse position index for one segment.
//!
//! Every `interval`-th record of a segment gets an entry mapping its
//! position to its byte offset. Positions inside a segment are strictly
//! increasing, so entries are sorted and a seek binary-searches them, then
//! scans forward at most `interval` records.

use logsync_core::{Position, NO_POSITION};

/// One sample of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Position of the sampled record
    pub position: Position,
    /// Byte offset of the sampled record's frame within the segment file
    pub offset: u64,
    /// Position of the record just before it in the same segment, or
    /// `NO_POSITION` if the sampled record opens the segment
    pub previous: Position,
}

/// Sorted samples of one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseIndex {
    entries: Vec<IndexEntry>,
    interval: usize,
    tracked: usize,
    last_position: Position,
}

impl SparseIndex {
    /// Create an empty index sampling every `interval` records.
    pub fn new(interval: usize) -> Self {
        SparseIndex {
            entries: Vec::new(),
            interval: interval.max(1),
            tracked: 0,
            last_position: NO_POSITION,
        }
    }

    /// Observe the next record of the segment.
    pub fn track(&mut self, position: Position, offset: u64) {
        if self.tracked % self.interval == 0 {
            self.entries.push(IndexEntry {
                position,
                offset,
                previous: self.last_position,
            });
        }
        self.tracked += 1;
        self.last_position = position;
    }

    /// Last sample whose position is `<= position`.
    pub fn floor(&self, position: Position) -> Option<IndexEntry> {
        let idx = self.entries.partition_point(|e| e.position <= position);
        idx.checked_sub(1).map(|i| self.entries[i])
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no record has been tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
