//! On-disk byte formats for the segmented log.
//!
//! Keeping serialization separate from operational logic (how segments are
//! written, rotated and read) makes format evolution easier to manage.
//!
//! # Module Structure
//!
//! - `log_segment`: segment header, segment file handle and record frames
//! - `segment_meta`: `.meta` sidecar written when a segment is sealed

pub mod log_segment;
pub mod segment_meta;

pub use log_segment::{
    decode_record, encode_record, frame_length, LogSegment, RecordFrameError, SegmentHeader,
    MAX_RECORD_LEN, RECORD_FORMAT_VERSION, SEGMENT_FORMAT_VERSION, SEGMENT_HEADER_SIZE,
    SEGMENT_MAGIC,
};
pub use segment_meta::{
    SegmentMeta, SegmentMetaError, SEGMENT_META_MAGIC, SEGMENT_META_SIZE, SEGMENT_META_VERSION,
};
