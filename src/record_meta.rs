//! Per-segment record index (`<segment>.meta`).
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **File header** (12 bytes, big-endian u32 each):
//!   `read_meta_offset | write_meta_offset | write_record_offset`.
//! - **Index entries**: 12-byte [`RecordMetaData`] records appended
//!   sequentially starting at byte 12.
//! - Entry `i` describes the physical placement of record `i` of the
//!   sibling data file; `write_record_offset` is the running content length
//!   of that data file and the start offset of the next append.
//!
//! Index entries are written synchronously on `add`; the header (cursors)
//! is flushed on a timer, at rolling boundaries, and at close. Recovery
//! after an unclean shutdown therefore loses at most one flush interval of
//! cursor movement, never already-indexed entries below the recovered
//! write cursor.

use crate::codec::{get_u32, put_u32};
use crate::error::{LogError, LogResult};
use crate::flusher::PeriodicFlusher;
use crate::formats::{INT_BYTES, SUMMARY_BASE_OFFSET};
use crate::storage::{Directory, SegmentFile};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Physical placement of one record inside one segment data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetaData {
    /// Byte offset of the record's header in the data file.
    pub start_offset: u32,
    /// Encoded width of the record id header (4 today; explicit for format
    /// flexibility).
    pub header_size: u32,
    /// Payload length in bytes.
    pub body_size: u32,
}

impl RecordMetaData {
    /// Encoded width of one index entry.
    pub const ENCODED_LEN: u32 = 3 * INT_BYTES;

    /// Total data-file bytes occupied by the described record.
    pub fn total_size(&self) -> u32 {
        self.header_size + self.body_size
    }

    /// Encode into the fixed 12-byte on-disk layout.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN as usize] {
        let mut buf = [0u8; Self::ENCODED_LEN as usize];
        put_u32(&mut buf[0..4], self.start_offset);
        put_u32(&mut buf[4..8], self.header_size);
        put_u32(&mut buf[8..12], self.body_size);
        buf
    }

    /// Decode from the fixed 12-byte on-disk layout.
    pub fn decode(buf: &[u8]) -> LogResult<Self> {
        if buf.len() != Self::ENCODED_LEN as usize {
            return Err(LogError::Format(format!(
                "record meta entry must be {} bytes, got {}",
                Self::ENCODED_LEN,
                buf.len()
            )));
        }
        Ok(Self {
            start_offset: get_u32(&buf[0..4]),
            header_size: get_u32(&buf[4..8]),
            body_size: get_u32(&buf[8..12]),
        })
    }
}

/// Persisted index of record placements for one segment, with read/write
/// cursors.
pub struct RecordMetaSummary {
    file: Arc<dyn SegmentFile>,
    path: String,
    read_meta_offset: AtomicU32,
    write_meta_offset: AtomicU32,
    write_record_offset: AtomicU32,
    metas: Mutex<Vec<RecordMetaData>>,
    flusher: Mutex<Option<PeriodicFlusher>>,
    closed: AtomicBool,
}

impl RecordMetaSummary {
    /// Open (or create) the summary backing file at `path`.
    ///
    /// A pre-existing file is recovered by replaying its header and index
    /// entries; recovery failure releases the handle and is fatal for the
    /// owning segment. A fresh file gets its empty header flushed
    /// synchronously. Either way a background flush timer is started.
    pub fn open(
        dir: &Arc<dyn Directory>,
        path: &str,
        flush_interval: Duration,
    ) -> LogResult<Arc<Self>> {
        let needs_recover = dir.exists(path);
        let file = dir.open_rw(path)?;

        let summary = Arc::new(Self {
            file,
            path: path.to_string(),
            read_meta_offset: AtomicU32::new(SUMMARY_BASE_OFFSET),
            write_meta_offset: AtomicU32::new(SUMMARY_BASE_OFFSET),
            write_record_offset: AtomicU32::new(0),
            metas: Mutex::new(Vec::new()),
            flusher: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        if needs_recover {
            if let Err(e) = summary.recover() {
                summary.closed.store(true, Ordering::SeqCst);
                return Err(e);
            }
        } else {
            summary.flush_header()?;
        }

        let weak = Arc::downgrade(&summary);
        let flusher = PeriodicFlusher::start(path, flush_interval, move || match weak.upgrade() {
            Some(s) => s.flush(),
            None => Ok(()),
        });
        *summary
            .flusher
            .lock()
            .map_err(|_| LogError::poisoned("record meta flusher"))? = Some(flusher);

        Ok(summary)
    }

    /// Append one index entry: write it at the write cursor, advance both
    /// write cursors, and extend the in-memory vector.
    pub fn add(&self, meta: RecordMetaData) -> LogResult<()> {
        let mut metas = self
            .metas
            .lock()
            .map_err(|_| LogError::poisoned("record meta index"))?;
        let position = self.write_meta_offset.load(Ordering::SeqCst);
        self.file.write_all_at(&meta.encode(), u64::from(position))?;

        self.write_meta_offset
            .fetch_add(RecordMetaData::ENCODED_LEN, Ordering::SeqCst);
        self.write_record_offset
            .fetch_add(meta.total_size(), Ordering::SeqCst);
        metas.push(meta);
        Ok(())
    }

    /// Return the entry at the read cursor and advance the cursor by one
    /// entry width. Callers must check [`Self::is_read_end`] first.
    pub fn next_meta(&self) -> LogResult<RecordMetaData> {
        let metas = self
            .metas
            .lock()
            .map_err(|_| LogError::poisoned("record meta index"))?;
        let index = self.read_index() as usize;
        let meta = *metas.get(index).ok_or_else(|| {
            LogError::InvalidState(format!(
                "read cursor {index} is past the end of {} entries",
                metas.len()
            ))
        })?;
        self.read_meta_offset
            .fetch_add(RecordMetaData::ENCODED_LEN, Ordering::SeqCst);
        Ok(meta)
    }

    /// True when the read cursor has consumed every index entry.
    pub fn is_read_end(&self) -> bool {
        let len = self.metas.lock().map(|m| m.len()).unwrap_or(0);
        self.read_index() as usize >= len
    }

    /// Current read cursor as an entry index.
    pub fn read_index(&self) -> u32 {
        (self.read_meta_offset.load(Ordering::SeqCst) - SUMMARY_BASE_OFFSET)
            / RecordMetaData::ENCODED_LEN
    }

    /// Point the read cursor at entry `index`.
    ///
    /// Index 0 is accepted even when the index is still empty (the cursor
    /// simply rests at the start); any other index must name an existing
    /// entry.
    pub fn reset_read_index(&self, index: u32) -> LogResult<()> {
        let metas = self
            .metas
            .lock()
            .map_err(|_| LogError::poisoned("record meta index"))?;
        if index as usize >= metas.len() && index != 0 {
            return Err(LogError::InvalidState(format!(
                "read index {index} is out of range (entries: {})",
                metas.len()
            )));
        }
        self.read_meta_offset.store(
            SUMMARY_BASE_OFFSET + index * RecordMetaData::ENCODED_LEN,
            Ordering::SeqCst,
        );
        Ok(())
    }

    /// Next byte offset at which record bytes should land in the sibling
    /// data file; equals the running content length of the segment.
    pub fn write_record_offset(&self) -> u32 {
        self.write_record_offset.load(Ordering::SeqCst)
    }

    /// Number of index entries.
    pub fn entry_count(&self) -> usize {
        self.metas.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Persist the header cursors. No-op after close; safe to run from the
    /// flush timer concurrently with foreground appends and reads.
    pub fn flush(&self) -> LogResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.flush_header()
    }

    fn flush_header(&self) -> LogResult<()> {
        let mut header = [0u8; SUMMARY_BASE_OFFSET as usize];
        put_u32(&mut header[0..4], self.read_meta_offset.load(Ordering::SeqCst));
        put_u32(&mut header[4..8], self.write_meta_offset.load(Ordering::SeqCst));
        put_u32(
            &mut header[8..12],
            self.write_record_offset.load(Ordering::SeqCst),
        );
        self.file.write_all_at(&header, 0)?;
        self.file.flush()?;
        Ok(())
    }

    fn recover(&self) -> LogResult<()> {
        let mut header = [0u8; SUMMARY_BASE_OFFSET as usize];
        self.file.read_exact_at(&mut header, 0)?;
        self.read_meta_offset
            .store(get_u32(&header[0..4]), Ordering::SeqCst);
        self.write_meta_offset
            .store(get_u32(&header[4..8]), Ordering::SeqCst);
        self.write_record_offset
            .store(get_u32(&header[8..12]), Ordering::SeqCst);

        let mut metas = self
            .metas
            .lock()
            .map_err(|_| LogError::poisoned("record meta index"))?;
        metas.clear();

        let end = self.write_meta_offset.load(Ordering::SeqCst);
        let mut offset = SUMMARY_BASE_OFFSET;
        let mut buf = [0u8; RecordMetaData::ENCODED_LEN as usize];
        while offset < end {
            self.file.read_exact_at(&mut buf, u64::from(offset))?;
            metas.push(RecordMetaData::decode(&buf)?);
            offset += RecordMetaData::ENCODED_LEN;
        }

        debug!(
            path = %self.path,
            entries = metas.len(),
            read_offset = self.read_meta_offset.load(Ordering::SeqCst),
            record_bytes = self.write_record_offset.load(Ordering::SeqCst),
            "recovered record meta summary"
        );
        Ok(())
    }

    /// Best-effort final flush, then stop the background timer and mark the
    /// summary unusable. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.flusher.lock() {
            if let Some(flusher) = slot.take() {
                flusher.stop();
            }
        }
        if let Err(e) = self.flush_header() {
            warn!(path = %self.path, error = %e, "final record meta flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDirectory;

    fn memory_dir() -> Arc<dyn Directory> {
        Arc::new(MemoryDirectory::new())
    }

    fn meta(start: u32, body: u32) -> RecordMetaData {
        RecordMetaData {
            start_offset: start,
            header_size: INT_BYTES,
            body_size: body,
        }
    }

    #[test]
    fn entry_encoding_is_twelve_bytes() {
        let m = meta(100, 7);
        let encoded = m.encode();
        assert_eq!(encoded.len(), 12);
        assert_eq!(RecordMetaData::decode(&encoded).unwrap(), m);
    }

    #[test]
    fn add_advances_both_write_cursors() {
        let dir = memory_dir();
        let s = RecordMetaSummary::open(&dir, "seg.log.meta", Duration::from_secs(60)).unwrap();
        assert_eq!(s.write_record_offset(), 0);

        s.add(meta(0, 5)).unwrap();
        s.add(meta(9, 3)).unwrap();
        assert_eq!(s.entry_count(), 2);
        assert_eq!(s.write_record_offset(), 4 + 5 + 4 + 3);
        s.close();
    }

    #[test]
    fn ordered_get_and_reset() {
        let dir = memory_dir();
        let s = RecordMetaSummary::open(&dir, "seg.log.meta", Duration::from_secs(60)).unwrap();
        s.add(meta(0, 5)).unwrap();
        s.add(meta(9, 3)).unwrap();

        assert!(!s.is_read_end());
        assert_eq!(s.next_meta().unwrap(), meta(0, 5));
        assert_eq!(s.next_meta().unwrap(), meta(9, 3));
        assert!(s.is_read_end());
        assert!(s.next_meta().is_err());

        s.reset_read_index(1).unwrap();
        assert_eq!(s.next_meta().unwrap(), meta(9, 3));

        // Out-of-range reset is rejected.
        assert!(s.reset_read_index(2).is_err());
        s.close();
    }

    #[test]
    fn reset_to_zero_on_an_empty_index_is_accepted() {
        let dir = memory_dir();
        let s = RecordMetaSummary::open(&dir, "seg.log.meta", Duration::from_secs(60)).unwrap();
        s.reset_read_index(0).unwrap();
        assert!(s.is_read_end());
        assert!(s.reset_read_index(1).is_err());
        s.close();
    }

    #[test]
    fn recover_restores_entries_and_cursors() {
        let dir = memory_dir();
        {
            let s = RecordMetaSummary::open(&dir, "seg.log.meta", Duration::from_secs(60)).unwrap();
            s.add(meta(0, 5)).unwrap();
            s.add(meta(9, 3)).unwrap();
            s.add(meta(16, 8)).unwrap();
            let _ = s.next_meta().unwrap(); // advance read cursor to 1
            s.close();
        }

        let s = RecordMetaSummary::open(&dir, "seg.log.meta", Duration::from_secs(60)).unwrap();
        assert_eq!(s.entry_count(), 3);
        assert_eq!(s.read_index(), 1);
        assert_eq!(s.write_record_offset(), 3 * 4 + 5 + 3 + 8);
        assert_eq!(s.next_meta().unwrap(), meta(9, 3));
        s.close();
    }

    #[test]
    fn close_is_idempotent_and_flush_after_close_is_noop() {
        let dir = memory_dir();
        let s = RecordMetaSummary::open(&dir, "seg.log.meta", Duration::from_secs(60)).unwrap();
        s.add(meta(0, 5)).unwrap();
        s.close();
        s.close();
        assert!(s.flush().is_ok());
    }
}
