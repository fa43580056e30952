//! One segment: a packed data file plus its record index.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - The data file is a packed sequence of `[u32 record id | payload]`
//!   frames starting at byte 0, with no per-file header and no padding.
//! - The record id is big-endian; frame boundaries are known only to the
//!   sibling `.meta` index ([`crate::record_meta::RecordMetaSummary`]).
//! - An index entry is added only after its record bytes are fully written,
//!   so every indexed record is readable.
//! - No append may push the data file past the segment size limit.

use crate::codec::{get_u32, put_u32};
use crate::error::{LogError, LogResult};
use crate::formats::INT_BYTES;
use crate::record::Record;
use crate::record_meta::{RecordMetaData, RecordMetaSummary};
use crate::storage::{Directory, SegmentFile};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An open segment: positioned-I/O handle on the data file plus the
/// segment's record index. Shared between the log's read and write sides
/// via `Arc` when both point at the same segment.
pub struct FileRecords {
    file: Arc<dyn SegmentFile>,
    file_name: String,
    size_limit: u32,
    meta: Arc<RecordMetaSummary>,
    closed: AtomicBool,
}

impl FileRecords {
    /// Open (or create) the segment whose data file lives at
    /// `<topic_dir>/<file_name>`; the record index lives alongside it at
    /// the same path with a `.meta` suffix.
    pub fn open(
        dir: &Arc<dyn Directory>,
        topic_dir: &str,
        file_name: &str,
        size_limit: u32,
        flush_interval: Duration,
    ) -> LogResult<Arc<Self>> {
        let data_path = format!("{topic_dir}/{file_name}");
        let meta_path = format!("{data_path}{}", crate::formats::RECORD_META_SUFFIX);
        let file = dir.open_rw(&data_path)?;
        let meta = RecordMetaSummary::open(dir, &meta_path, flush_interval)?;
        Ok(Arc::new(Self {
            file,
            file_name: file_name.to_string(),
            size_limit,
            meta,
            closed: AtomicBool::new(false),
        }))
    }

    /// Segment data file name (without directory).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Append one record frame at the current write offset and index it.
    ///
    /// Returns the number of data-file bytes the record occupies. The size
    /// limit is re-checked here against the full frame so a mis-sized
    /// rolling decision can never overflow the file on disk.
    pub fn append_one(&self, record_id: u32, payload: &[u8]) -> LogResult<u32> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LogError::InvalidState(format!(
                "append to closed segment {}",
                self.file_name
            )));
        }
        let body_size = u32::try_from(payload.len()).map_err(|_| {
            LogError::Format(format!("payload of {} bytes exceeds u32", payload.len()))
        })?;
        let total = INT_BYTES.checked_add(body_size).ok_or_else(|| {
            LogError::Format(format!(
                "record frame for a {body_size}-byte payload overflows u32"
            ))
        })?;
        let start_offset = self.meta.write_record_offset();
        let fits = start_offset
            .checked_add(total)
            .is_some_and(|end| end <= self.size_limit);
        if !fits {
            return Err(LogError::SegmentFull {
                file: self.file_name.clone(),
                offset: start_offset,
                incoming: total,
                limit: self.size_limit,
            });
        }

        let mut frame = Vec::with_capacity(total as usize);
        frame.extend_from_slice(&[0; INT_BYTES as usize]);
        put_u32(&mut frame[..INT_BYTES as usize], record_id);
        frame.extend_from_slice(payload);
        self.file.write_all_at(&frame, u64::from(start_offset))?;

        // Index only after the frame landed.
        self.meta.add(RecordMetaData {
            start_offset,
            header_size: INT_BYTES,
            body_size,
        })?;
        Ok(total)
    }

    /// Append several already-identified records in order, returning the
    /// total data-file bytes written. Stops at the first failure; records
    /// appended before it remain indexed.
    pub fn append_all(&self, records: &[Record]) -> LogResult<u32> {
        let mut total = 0;
        for record in records {
            total += self.append_one(record.id(), record.payload())?;
        }
        Ok(total)
    }

    /// Read the record at the read cursor and advance the cursor, or
    /// `None` when the segment is exhausted.
    pub fn make_next(&self) -> LogResult<Option<Record>> {
        if self.meta.is_read_end() {
            return Ok(None);
        }
        let meta = self.meta.next_meta()?;
        if meta.header_size != INT_BYTES {
            return Err(LogError::Format(format!(
                "unsupported record header size {} in {}",
                meta.header_size, self.file_name
            )));
        }

        let mut header = [0u8; INT_BYTES as usize];
        self.file
            .read_exact_at(&mut header, u64::from(meta.start_offset))?;
        let id = get_u32(&header);

        let mut payload = vec![0u8; meta.body_size as usize];
        self.file
            .read_exact_at(&mut payload, u64::from(meta.start_offset + INT_BYTES))?;
        Ok(Some(Record::new(id, payload)))
    }

    /// True when the read cursor has consumed every record in the segment.
    pub fn is_read_end(&self) -> bool {
        self.meta.is_read_end()
    }

    /// Point the read cursor at record `index` within this segment.
    pub fn reset_read_index(&self, index: u32) -> LogResult<()> {
        self.meta.reset_read_index(index)
    }

    /// Data-file bytes written so far (the next append offset).
    pub fn content_length(&self) -> u32 {
        self.meta.write_record_offset()
    }

    /// Number of records in this segment.
    pub fn record_count(&self) -> usize {
        self.meta.entry_count()
    }

    /// Iterate the remaining unread records of this segment.
    pub fn iter(&self) -> SegmentIterator<'_> {
        SegmentIterator { records: self }
    }

    /// Flush the record index and data file buffers.
    pub fn flush(&self) -> LogResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.meta.flush()?;
        self.file.flush()?;
        Ok(())
    }

    /// Flush, then close the record index. Idempotent; further appends
    /// fail and flushes become no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.meta.close();
        if let Err(e) = self.file.flush() {
            tracing::warn!(file = %self.file_name, error = %e, "final segment flush failed");
        }
    }
}

/// Borrow-based cursor over the unread tail of one segment.
pub struct SegmentIterator<'a> {
    records: &'a FileRecords,
}

impl SegmentIterator<'_> {
    /// True when another record is available in this segment.
    pub fn has_next(&self) -> bool {
        !self.records.is_read_end()
    }

    /// Reposition the cursor at record `index` within the segment.
    pub fn reset(&mut self, index: u32) -> LogResult<()> {
        self.records.reset_read_index(index)
    }
}

impl Iterator for SegmentIterator<'_> {
    type Item = LogResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.make_next().transpose()
    }
}
