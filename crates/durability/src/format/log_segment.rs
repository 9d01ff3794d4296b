//! Log segment file and record frame format.
//!
//! Log segments are named `log-NNNNNN.seg` where `NNNNNN` is a zero-padded segment number.
//!
//! # Segment Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Segment Header (40 bytes)          │
//! ├────────────────────────────────────┤
//! │ Record 1                           │
//! ├────────────────────────────────────┤
//! │ Record 2                           │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//!
//! Payload:
//! ┌────────────┬─────────┬───────────────┬─────────────┬────────────┬─────────┐
//! │ Position(8)│ Key (8) │ Timestamp (8) │ VT len (2)  │ Value type │ Payload │
//! └────────────┴─────────┴───────────────┴─────────────┴────────────┴─────────┘
//! ```
//!
//! The partition is not stored per record; it lives in the segment header.

use crc32fast::Hasher;
use logsync_core::{LogRecord, PartitionId, ValueType, MAX_VALUE_TYPE_LEN};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a log segment file: "LSYN"
pub const SEGMENT_MAGIC: [u8; 4] = *b"LSYN";

/// Current segment format version
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 40;

/// Current record frame format version
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// Fixed part of a record payload: version + position + key + timestamp + vt_len
const RECORD_FIXED_SIZE: usize = 1 + 8 + 8 + 8 + 2;

/// Upper bound on a plausible record length, used when skipping corrupted frames.
pub const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

/// Log segment header (40 bytes).
///
/// The header is written at the beginning of each segment file and contains
/// metadata for validation and compatibility checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes: "LSYN"
    pub magic: [u8; 4],

    /// Format version for forward compatibility
    pub format_version: u32,

    /// Segment number (monotonically increasing)
    pub segment_number: u64,

    /// Partition whose records this segment holds
    pub partition: PartitionId,

    /// Log UUID (for integrity checking across segments)
    pub log_uuid: [u8; 16],
}

impl SegmentHeader {
    /// Create a new segment header.
    pub fn new(segment_number: u64, partition: PartitionId, log_uuid: [u8; 16]) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            segment_number,
            partition,
            log_uuid,
        }
    }

    /// Serialize header to bytes.
    ///
    /// Bytes 20..24 are reserved and written as zero.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.segment_number.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.partition.to_le_bytes());
        bytes[24..40].copy_from_slice(&self.log_uuid);
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Option<Self> {
        Some(SegmentHeader {
            magic: bytes[0..4].try_into().ok()?,
            format_version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            segment_number: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            partition: u32::from_le_bytes(bytes[16..20].try_into().ok()?),
            log_uuid: bytes[24..40].try_into().ok()?,
        })
    }

    /// Validate the header has correct magic bytes and a known version.
    pub fn is_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC && self.format_version == SEGMENT_FORMAT_VERSION
    }
}

/// Log segment file handle.
///
/// A segment is a single file containing multiple record frames.
/// Only the active segment is writable; sealed segments are immutable.
pub struct LogSegment {
    file: File,
    segment_number: u64,
    /// Bytes from the start of the file, header included
    write_position: u64,
    /// Sealed or opened read-only
    sealed: bool,
    header: SegmentHeader,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl LogSegment {
    /// Create a segment file and write its header.
    pub fn create(
        dir: &Path,
        segment_number: u64,
        partition: PartitionId,
        log_uuid: [u8; 16],
    ) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .read(true)
            .open(Self::segment_path(dir, segment_number))?;

        let header = SegmentHeader::new(segment_number, partition, log_uuid);
        file.write_all(&header.to_bytes())?;

        Ok(Self::from_parts(
            file,
            header,
            SEGMENT_HEADER_SIZE as u64,
            false,
        ))
    }

    /// Open an existing segment read-only.
    pub fn open_read(dir: &Path, segment_number: u64) -> std::io::Result<Self> {
        Self::open_existing(dir, segment_number, false)
    }

    /// Reopen the last segment of a log to keep appending to it.
    pub fn open_append(dir: &Path, segment_number: u64) -> std::io::Result<Self> {
        Self::open_existing(dir, segment_number, true)
    }

    fn open_existing(dir: &Path, segment_number: u64, writable: bool) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(Self::segment_path(dir, segment_number))?;

        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut bytes)?;
        let header = SegmentHeader::from_bytes(&bytes)
            .filter(SegmentHeader::is_valid)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "bad segment magic or format version",
                )
            })?;
        // A renamed or misplaced file must not be spliced into the log
        if header.segment_number != segment_number {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "segment file {} carries segment number {}",
                    segment_number, header.segment_number
                ),
            ));
        }

        let end = file.seek(SeekFrom::End(0))?;
        Ok(Self::from_parts(file, header, end, !writable))
    }

    fn from_parts(file: File, header: SegmentHeader, write_position: u64, sealed: bool) -> Self {
        LogSegment {
            file,
            segment_number: header.segment_number,
            write_position,
            sealed,
            header,
            #[cfg(test)]
            fail_next_sync: false,
        }
    }

    /// `log-NNNNNN.seg` inside `dir`.
    pub fn segment_path(dir: &Path, segment_number: u64) -> PathBuf {
        dir.join(format!("log-{:06}.seg", segment_number))
    }

    /// Segment number encoded in a file name, if it names a segment.
    pub fn parse_segment_name(name: &str) -> Option<u64> {
        name.strip_prefix("log-")?
            .strip_suffix(".seg")
            .filter(|digits| digits.len() >= 6)?
            .parse::<u64>()
            .ok()
    }

    /// Segment numbers present in `dir`, ascending.
    pub fn list_segments(dir: &Path) -> std::io::Result<Vec<u64>> {
        let mut numbers = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            if let Some(number) = Self::parse_segment_name(&entry?.file_name().to_string_lossy()) {
                numbers.push(number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Segment number
    pub fn segment_number(&self) -> u64 {
        self.segment_number
    }

    /// Header as read or written
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Current size in bytes, header included
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Append raw frame bytes.
    pub fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.ensure_writable("write to")?;
        self.file.write_all(data)?;
        self.write_position += data.len() as u64;
        Ok(())
    }

    /// fsync the segment file.
    pub fn sync(&mut self) -> std::io::Result<()> {
        if self.take_sync_failure() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected fsync failure",
            ));
        }
        self.file.sync_all()
    }

    /// Make the next `sync` fail.
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    #[cfg(test)]
    fn take_sync_failure(&mut self) -> bool {
        std::mem::take(&mut self.fail_next_sync)
    }

    #[cfg(not(test))]
    fn take_sync_failure(&mut self) -> bool {
        false
    }

    /// Sync and seal; later writes are rejected. Idempotent.
    pub fn close(&mut self) -> std::io::Result<()> {
        if !self.sealed {
            self.file.sync_all()?;
            self.sealed = true;
        }
        Ok(())
    }

    /// Every byte after the header.
    pub fn read_body(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        self.file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// Cut the file back to `len` bytes, dropping a partial or unsynced tail.
    pub fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.ensure_writable("truncate")?;
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::Start(len))?;
        self.write_position = len;
        Ok(())
    }

    fn ensure_writable(&self, action: &str) -> std::io::Result<()> {
        if self.sealed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot {} sealed segment {}", action, self.segment_number),
            ));
        }
        Ok(())
    }
}

/// Serialize a record to a frame.
///
/// Format: length (4) + format_version (1) + payload + crc32 (4)
///
/// The length field contains the size of (format_version + payload + crc32).
/// The caller must have checked that the value-type fits in a `u16`.
pub fn encode_record(record: &LogRecord) -> Vec<u8> {
    let value_type = record.value_type.as_str().as_bytes();

    let mut payload = Vec::with_capacity(RECORD_FIXED_SIZE + value_type.len() + record.payload.len());
    payload.push(RECORD_FORMAT_VERSION);
    payload.extend_from_slice(&record.position.to_le_bytes());
    payload.extend_from_slice(&record.key.to_le_bytes());
    payload.extend_from_slice(&record.timestamp.to_le_bytes());
    payload.extend_from_slice(&(value_type.len() as u16).to_le_bytes());
    payload.extend_from_slice(value_type);
    payload.extend_from_slice(&record.payload);

    let crc = compute_crc(&payload);

    let total_len = payload.len() + 4;
    let mut frame = Vec::with_capacity(4 + total_len);
    frame.extend_from_slice(&(total_len as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Read the length prefix of a frame, if enough bytes are present.
pub fn frame_length(bytes: &[u8]) -> Option<usize> {
    let prefix: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix) as usize)
}

/// Deserialize a record frame.
///
/// Returns (record, bytes_consumed) on success. The record is stamped with
/// `partition`, which comes from the segment header.
pub fn decode_record(
    bytes: &[u8],
    partition: PartitionId,
) -> Result<(LogRecord, usize), RecordFrameError> {
    let length = frame_length(bytes).ok_or(RecordFrameError::InsufficientData)?;

    if length == 0 {
        return Err(RecordFrameError::InvalidFormat);
    }

    if bytes.len() < 4 + length {
        return Err(RecordFrameError::InsufficientData);
    }

    if length < 5 {
        // Minimum: 1 byte format version + 4 bytes CRC
        return Err(RecordFrameError::InvalidFormat);
    }

    let payload_with_crc = &bytes[4..4 + length];
    let payload = &payload_with_crc[..length - 4];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&payload_with_crc[length - 4..]);
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let computed_crc = compute_crc(payload);
    if computed_crc != stored_crc {
        return Err(RecordFrameError::ChecksumMismatch {
            expected: stored_crc,
            computed: computed_crc,
        });
    }

    if payload.len() < RECORD_FIXED_SIZE {
        return Err(RecordFrameError::InvalidFormat);
    }

    let format_version = payload[0];
    if format_version != RECORD_FORMAT_VERSION {
        return Err(RecordFrameError::UnsupportedVersion(format_version));
    }

    let position = i64::from_le_bytes(read_array(payload, 1));
    let key = i64::from_le_bytes(read_array(payload, 9));
    let timestamp = u64::from_le_bytes(read_array(payload, 17));
    let vt_len = u16::from_le_bytes(read_array(payload, 25)) as usize;

    let vt_end = RECORD_FIXED_SIZE + vt_len;
    if payload.len() < vt_end || vt_len > MAX_VALUE_TYPE_LEN {
        return Err(RecordFrameError::InvalidFormat);
    }
    let value_type = std::str::from_utf8(&payload[RECORD_FIXED_SIZE..vt_end])
        .map_err(|_| RecordFrameError::InvalidFormat)?;

    let record = LogRecord {
        partition,
        position,
        key,
        value_type: ValueType::new(value_type),
        timestamp,
        payload: payload[vt_end..].to_vec(),
    };

    Ok((record, 4 + length))
}

/// Copy `N` bytes starting at `offset`; caller guarantees the bounds.
fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

/// Compute CRC32 checksum of data.
fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Record frame parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordFrameError {
    /// Not enough data to parse record
    #[error("Insufficient data to parse record")]
    InsufficientData,

    /// Record format is invalid
    #[error("Invalid record format")]
    InvalidFormat,

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum from record
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),
}
