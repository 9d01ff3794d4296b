//! Per-segment metadata sidecar files.
//!
//! Each sealed log segment `log-NNNNNN.seg` gets a companion `log-NNNNNN.meta`
//! file containing 60 bytes of metadata: first/last record positions, min/max
//! timestamps and record count. Opening a log uses these to build the segment
//! table without scanning sealed segments.
//!
//! # Binary Format (60 bytes)
//!
//! ```text
//! magic("LSMT", 4) + version(4) + segment_number(8) + first_position(8)
//! + last_position(8) + min_ts(8) + max_ts(8) + record_count(8) + crc32(4) = 60 bytes
//! ```
//!
//! `.meta` files are optional. Missing or corrupted ones fall back to a full
//! scan of the segment and are regenerated.

use logsync_core::{Position, NO_POSITION};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes for segment metadata files.
pub const SEGMENT_META_MAGIC: &[u8; 4] = b"LSMT";

/// Current format version for segment metadata.
pub const SEGMENT_META_VERSION: u32 = 1;

/// Total size of a serialized `SegmentMeta` in bytes.
pub const SEGMENT_META_SIZE: usize = 60;

/// Per-segment metadata tracking the position range, timestamps and count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMeta {
    /// Segment number this metadata belongs to.
    pub segment_number: u64,
    /// Position of the first record, `NO_POSITION` when empty.
    pub first_position: Position,
    /// Position of the last record, `NO_POSITION` when empty.
    pub last_position: Position,
    /// Minimum timestamp (microseconds since epoch) across all records.
    /// `u64::MAX` when empty.
    pub min_timestamp: u64,
    /// Maximum timestamp (microseconds since epoch) across all records.
    /// `0` when empty.
    pub max_timestamp: u64,
    /// Number of records tracked.
    pub record_count: u64,
}

impl SegmentMeta {
    /// Create a new empty metadata tracker for the given segment.
    pub fn new_empty(segment_number: u64) -> Self {
        SegmentMeta {
            segment_number,
            first_position: NO_POSITION,
            last_position: NO_POSITION,
            min_timestamp: u64::MAX,
            max_timestamp: 0,
            record_count: 0,
        }
    }

    /// Update the running range with a new record.
    ///
    /// Records arrive in position order, so the first tracked position is
    /// the segment's first and the latest is its last.
    pub fn track_record(&mut self, position: Position, timestamp: u64) {
        if self.record_count == 0 {
            self.first_position = position;
        }
        self.last_position = position;
        self.min_timestamp = self.min_timestamp.min(timestamp);
        self.max_timestamp = self.max_timestamp.max(timestamp);
        self.record_count += 1;
    }

    /// Returns `true` if no records have been tracked.
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Whether `position` falls inside this segment's range.
    pub fn covers(&self, position: Position) -> bool {
        !self.is_empty() && self.first_position <= position && position <= self.last_position
    }

    /// Generate the path for a `.meta` sidecar file.
    pub fn meta_path(dir: &Path, segment_number: u64) -> PathBuf {
        dir.join(format!("log-{:06}.meta", segment_number))
    }

    /// Write the metadata to a `.meta` file using write-fsync-rename.
    pub fn write_to_file(&self, dir: &Path) -> Result<(), SegmentMetaError> {
        let final_path = Self::meta_path(dir, self.segment_number);
        let temp_path = final_path.with_extension("meta.tmp");

        let bytes = self.to_bytes_full();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;

        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &final_path)?;

        // Sync parent directory
        if let Some(parent) = final_path.parent() {
            if parent.exists() {
                File::open(parent)?.sync_all()?;
            }
        }

        Ok(())
    }

    /// Read a `.meta` file for the given segment number.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn read_from_file(
        dir: &Path,
        segment_number: u64,
    ) -> Result<Option<Self>, SegmentMetaError> {
        let path = Self::meta_path(dir, segment_number);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(Self::from_bytes(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SegmentMetaError::Io(e)),
        }
    }

    /// Serialize to the full binary format with CRC.
    fn to_bytes_full(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SEGMENT_META_SIZE);
        buf.extend_from_slice(SEGMENT_META_MAGIC);
        buf.extend_from_slice(&SEGMENT_META_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.segment_number.to_le_bytes());
        buf.extend_from_slice(&self.first_position.to_le_bytes());
        buf.extend_from_slice(&self.last_position.to_le_bytes());
        buf.extend_from_slice(&self.min_timestamp.to_le_bytes());
        buf.extend_from_slice(&self.max_timestamp.to_le_bytes());
        buf.extend_from_slice(&self.record_count.to_le_bytes());

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Deserialize from bytes, validating magic, version, and CRC.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SegmentMetaError> {
        if data.len() < SEGMENT_META_SIZE {
            return Err(SegmentMetaError::TooShort {
                expected: SEGMENT_META_SIZE,
                actual: data.len(),
            });
        }

        if &data[0..4] != SEGMENT_META_MAGIC {
            return Err(SegmentMetaError::InvalidMagic);
        }

        let version = u32::from_le_bytes(field(data, 4));
        if version != SEGMENT_META_VERSION {
            return Err(SegmentMetaError::UnsupportedVersion(version));
        }

        // CRC covers the first SEGMENT_META_SIZE - 4 bytes
        let crc_offset = SEGMENT_META_SIZE - 4;
        let stored_crc = u32::from_le_bytes(field(data, crc_offset));
        let computed_crc = crc32fast::hash(&data[..crc_offset]);
        if stored_crc != computed_crc {
            return Err(SegmentMetaError::ChecksumMismatch {
                stored: stored_crc,
                computed: computed_crc,
            });
        }

        Ok(SegmentMeta {
            segment_number: u64::from_le_bytes(field(data, 8)),
            first_position: i64::from_le_bytes(field(data, 16)),
            last_position: i64::from_le_bytes(field(data, 24)),
            min_timestamp: u64::from_le_bytes(field(data, 32)),
            max_timestamp: u64::from_le_bytes(field(data, 40)),
            record_count: u64::from_le_bytes(field(data, 48)),
        })
    }
}

/// Copy a fixed-width field; callers have already checked the length.
fn field<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[offset..offset + N]);
    out
}

/// Errors that can occur when reading or writing segment metadata.
#[derive(Debug, thiserror::Error)]
pub enum SegmentMetaError {
    /// Data too short to contain a valid metadata header.
    #[error("segment meta too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Expected minimum size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// Magic bytes do not match `LSMT`.
    #[error("invalid segment meta magic bytes")]
    InvalidMagic,

    /// Unsupported format version.
    #[error("unsupported segment meta version: {0}")]
    UnsupportedVersion(u32),

    /// CRC32 checksum mismatch.
    #[error("segment meta checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC stored in the file.
        stored: u32,
        /// CRC computed from the data.
        computed: u32,
    },

    /// I/O error during file operations.
    #[error("segment meta I/O error: {0}")]
    Io(#[from] std::io::Error),
}
