//! On-disk layout constants.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - All integers are **big-endian u32** (4 bytes).
//! - Topic summary file: `[read_meta_offset][write_meta_offset][max_record_id]`
//!   header at byte 0, then 140-byte segment descriptors from byte 12.
//! - Segment `.meta` file: `[read_meta_offset][write_meta_offset][write_record_offset]`
//!   header at byte 0, then 12-byte record descriptors from byte 12.
//! - Segment data file: densely packed `[id:u32][body bytes...]` records from
//!   byte 0; record boundaries exist only in the companion `.meta` file.
//! - File names inside descriptors are space-left-padded ASCII in a fixed
//!   128-byte field.

/// Width of one integer field on disk.
pub const INT_BYTES: u32 = 4;

/// Byte offset where index entries begin in both summary files (3 header ints).
pub const SUMMARY_BASE_OFFSET: u32 = 3 * INT_BYTES;

/// Fixed width of the file-name field inside a topic descriptor.
pub const FILE_NAME_LENGTH_LIMIT: usize = 128;

/// Topic-level meta summary file name inside a topic directory.
pub const TOPIC_SUMMARY_FILE: &str = "Kubrick_summary.log";

/// Suffix of segment data files (`NNNN_Kubrick.log`).
pub const SEGMENT_FILE_SUFFIX: &str = "_Kubrick.log";

/// Suffix appended to a segment data file name to locate its record index.
pub const RECORD_META_SUFFIX: &str = ".meta";

/// Default per-segment content size limit: 500 MiB.
pub const DEFAULT_SEGMENT_SIZE_LIMIT: u32 = 500 * 1024 * 1024;

/// Default interval between background metadata flushes.
pub const DEFAULT_FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
