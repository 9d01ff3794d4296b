//! Segment scanning: frame-at-offset reads for readers, full scans for
//! opening a log and for building a sealed segment's index.

use super::index::SparseIndex;
use super::table::{ActiveSegment, SealedSegment, SegmentTable};
use crate::error::LogError;
use crate::format::{
    decode_record, frame_length, LogSegment, RecordFrameError, SegmentHeader, SegmentMeta,
    MAX_RECORD_LEN, SEGMENT_HEADER_SIZE,
};
use logsync_core::{LogRecord, PartitionId, Position, NO_POSITION};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Outcome of reading one frame at a byte offset.
#[derive(Debug)]
pub(crate) enum FrameRead {
    /// A valid record and the offset just past it
    Record(LogRecord, u64),
    /// A damaged frame whose length is plausible; resume at `next`
    Corrupt { next: u64 },
    /// Nothing readable before `end`
    End,
}

/// Read the frame starting at `offset`, never touching bytes at or past `end`.
pub(crate) fn read_frame_at(
    file: &mut File,
    offset: u64,
    end: u64,
    partition: PartitionId,
) -> std::io::Result<FrameRead> {
    if offset + 4 > end {
        return Ok(FrameRead::End);
    }

    let mut prefix = [0u8; 4];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut prefix)?;

    let length = u32::from_le_bytes(prefix) as usize;
    let next = offset + 4 + length as u64;
    if length == 0 || length > MAX_RECORD_LEN || next > end {
        return Ok(FrameRead::End);
    }

    let mut frame = vec![0u8; 4 + length];
    frame[..4].copy_from_slice(&prefix);
    file.read_exact(&mut frame[4..])?;

    match decode_record(&frame, partition) {
        Ok((record, _)) => Ok(FrameRead::Record(record, next)),
        Err(RecordFrameError::InsufficientData) => Ok(FrameRead::End),
        Err(e) => {
            warn!(target: "logsync::log", offset, error = %e, "Skipping corrupted log record");
            Ok(FrameRead::Corrupt { next })
        }
    }
}

/// Result of scanning a whole segment.
#[derive(Debug)]
pub(crate) struct SegmentScan {
    pub header: SegmentHeader,
    pub meta: SegmentMeta,
    pub index: SparseIndex,
    /// Byte offset where valid frames end
    pub valid_end: u64,
    /// Size of the file on disk
    pub file_size: u64,
    pub skipped_corrupted: usize,
}

/// Scan every frame of a segment.
///
/// Corrupted frames with a plausible length are skipped; scanning stops at
/// the first frame whose boundary cannot be determined (a partial tail).
pub(crate) fn scan_segment(
    dir: &Path,
    segment_number: u64,
    index_interval: usize,
) -> Result<SegmentScan, LogError> {
    let mut segment = LogSegment::open_read(dir, segment_number)?;
    let header = *segment.header();
    let file_size = segment.size();
    let buffer = segment.read_body()?;

    let hdr_size = SEGMENT_HEADER_SIZE as u64;
    let mut meta = SegmentMeta::new_empty(segment_number);
    let mut index = SparseIndex::new(index_interval);
    let mut valid_end = hdr_size;
    let mut skipped_corrupted = 0usize;
    let mut offset = 0usize;

    while offset < buffer.len() {
        let remaining = &buffer[offset..];
        match decode_record(remaining, header.partition) {
            Ok((record, consumed)) => {
                if record.position <= meta.last_position {
                    return Err(LogError::CorruptSegment {
                        segment: segment_number,
                        detail: format!(
                            "position {} follows {}",
                            record.position, meta.last_position
                        ),
                    });
                }
                index.track(record.position, hdr_size + offset as u64);
                meta.track_record(record.position, record.timestamp);
                offset += consumed;
                valid_end = hdr_size + offset as u64;
            }
            Err(RecordFrameError::InsufficientData) => break,
            Err(e) => {
                // Try to skip the damaged frame using its length field
                match frame_length(remaining) {
                    Some(len) if len > 0 && len < MAX_RECORD_LEN && remaining.len() >= 4 + len => {
                        warn!(
                            target: "logsync::log",
                            segment = segment_number,
                            offset,
                            error = %e,
                            "Skipping corrupted log record"
                        );
                        offset += 4 + len;
                        valid_end = hdr_size + offset as u64;
                        skipped_corrupted += 1;
                    }
                    // Can't determine boundary, stop
                    _ => break,
                }
            }
        }
    }

    Ok(SegmentScan {
        header,
        meta,
        index,
        valid_end,
        file_size,
        skipped_corrupted,
    })
}

/// Rebuilt state of a log directory.
pub(crate) struct Recovered {
    pub table: SegmentTable,
    pub segment: LogSegment,
    pub log_uuid: [u8; 16],
}

/// Open a log directory: validate every segment, rebuild the segment table,
/// truncate a partial tail and reopen the last segment for appending.
///
/// Sealed segments with a valid `.meta` sidecar are not scanned; their
/// index is built on first seek.
pub(crate) fn recover(
    dir: &Path,
    partition: PartitionId,
    index_interval: usize,
) -> Result<Recovered, LogError> {
    std::fs::create_dir_all(dir)?;
    let numbers = LogSegment::list_segments(dir)?;

    let Some((&last_number, sealed_numbers)) = numbers.split_last() else {
        let log_uuid = *uuid::Uuid::new_v4().as_bytes();
        let segment = LogSegment::create(dir, 1, partition, log_uuid)?;
        return Ok(Recovered {
            table: SegmentTable {
                sealed: Vec::new(),
                active: ActiveSegment::empty(1, index_interval),
            },
            segment,
            log_uuid,
        });
    };

    let mut log_uuid: Option<[u8; 16]> = None;
    let mut sealed = Vec::with_capacity(sealed_numbers.len());
    let mut last_position = NO_POSITION;

    for &number in sealed_numbers {
        let header = *LogSegment::open_read(dir, number)?.header();
        check_header(&header, partition, &mut log_uuid)?;

        let segment = match SegmentMeta::read_from_file(dir, number) {
            Ok(Some(meta)) if meta.segment_number == number => {
                let end_offset = std::fs::metadata(LogSegment::segment_path(dir, number))?.len();
                SealedSegment::lazy(meta, end_offset)
            }
            other => {
                if let Err(e) = other {
                    warn!(target: "logsync::log", segment = number, error = %e, "Ignoring unreadable segment meta");
                }
                let scan = scan_segment(dir, number, index_interval)?;
                if scan.valid_end < scan.file_size {
                    warn!(
                        target: "logsync::log",
                        segment = number,
                        valid_end = scan.valid_end,
                        file_size = scan.file_size,
                        "Sealed segment has trailing bytes"
                    );
                }
                if let Err(e) = scan.meta.write_to_file(dir) {
                    warn!(target: "logsync::log", segment = number, error = %e, "Failed to regenerate segment meta");
                }
                SealedSegment::with_index(scan.meta, scan.valid_end, scan.index)
            }
        };

        if segment.meta.is_empty() {
            continue;
        }
        check_order(number, segment.meta.first_position, last_position)?;
        last_position = segment.meta.last_position;
        sealed.push(Arc::new(segment));
    }

    // A crash during segment creation can leave a file without a full header
    let segment_path = LogSegment::segment_path(dir, last_number);
    if std::fs::metadata(&segment_path)?.len() < SEGMENT_HEADER_SIZE as u64 {
        warn!(target: "logsync::log", segment = last_number, "Replacing segment with incomplete header");
        std::fs::remove_file(&segment_path)?;
        let uuid = log_uuid.unwrap_or_else(|| *uuid::Uuid::new_v4().as_bytes());
        let segment = LogSegment::create(dir, last_number, partition, uuid)?;
        return Ok(Recovered {
            table: SegmentTable {
                sealed,
                active: ActiveSegment::empty(last_number, index_interval),
            },
            segment,
            log_uuid: uuid,
        });
    }

    let scan = scan_segment(dir, last_number, index_interval)?;
    check_header(&scan.header, partition, &mut log_uuid)?;
    if !scan.meta.is_empty() {
        check_order(last_number, scan.meta.first_position, last_position)?;
    }
    if scan.skipped_corrupted > 0 {
        warn!(
            target: "logsync::log",
            segment = last_number,
            skipped = scan.skipped_corrupted,
            "Active segment contains corrupted records"
        );
    }

    let mut segment = LogSegment::open_append(dir, last_number)?;
    if scan.valid_end < scan.file_size {
        warn!(
            target: "logsync::log",
            segment = last_number,
            valid_end = scan.valid_end,
            file_size = scan.file_size,
            "Truncating partial record at log tail"
        );
        segment.truncate(scan.valid_end)?;
    }

    Ok(Recovered {
        table: SegmentTable {
            sealed,
            active: ActiveSegment {
                meta: scan.meta,
                end_offset: scan.valid_end,
                index: scan.index,
            },
        },
        segment,
        log_uuid: log_uuid.unwrap_or(scan.header.log_uuid),
    })
}

fn check_header(
    header: &SegmentHeader,
    partition: PartitionId,
    log_uuid: &mut Option<[u8; 16]>,
) -> Result<(), LogError> {
    if header.partition != partition {
        return Err(LogError::CorruptSegment {
            segment: header.segment_number,
            detail: format!(
                "segment belongs to partition {}, expected {}",
                header.partition, partition
            ),
        });
    }
    match log_uuid {
        Some(uuid) if *uuid != header.log_uuid => Err(LogError::CorruptSegment {
            segment: header.segment_number,
            detail: "segment belongs to a different log".to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            *log_uuid = Some(header.log_uuid);
            Ok(())
        }
    }
}

fn check_order(segment: u64, first: Position, previous_last: Position) -> Result<(), LogError> {
    if first <= previous_last {
        return Err(LogError::CorruptSegment {
            segment,
            detail: format!(
                "first position {} does not follow previous segment's last position {}",
                first, previous_last
            ),
        });
    }
    Ok(())
}
