//! Per-topic segment index (`Kubrick_summary.log`).
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **File header** (12 bytes, big-endian u32 each):
//!   `read_meta_offset | write_meta_offset | max_record_id`.
//! - **Index entries**: 140-byte [`TopicMetaData`] descriptors appended
//!   sequentially starting at byte 12, one per segment, ordered by
//!   ascending `start_record_id` with contiguous, non-overlapping id
//!   ranges.
//! - `max_record_id` is the sole source of new record ids for the topic.
//!
//! A descriptor's trailing fields (`end_record_id`, `content_bytes_length`)
//! keep changing while its segment is the active write segment; they are
//! re-persisted at the descriptor's known slot by `flush` and before a new
//! descriptor is appended at rolling time.

use crate::codec::{decode_name, encode_name, get_u32, put_u32};
use crate::error::{LogError, LogResult};
use crate::file_records::FileRecords;
use crate::flusher::PeriodicFlusher;
use crate::formats::{FILE_NAME_LENGTH_LIMIT, INT_BYTES, SUMMARY_BASE_OFFSET};
use crate::storage::{Directory, SegmentFile};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Descriptor of one segment: its data file name, the record-id range it
/// holds, and its accumulated content length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetaData {
    file_name: String,
    start_record_id: u32,
    end_record_id: u32,
    content_bytes_length: u32,
}

impl TopicMetaData {
    /// Encoded width of one descriptor: 128-byte name field + 3 u32.
    pub const ENCODED_LEN: u32 = FILE_NAME_LENGTH_LIMIT as u32 + 3 * INT_BYTES;

    /// Create a descriptor for a fresh segment starting at `start_record_id`.
    ///
    /// Rejects empty or over-long file names before anything is written.
    pub fn new(file_name: &str, start_record_id: u32) -> LogResult<Self> {
        // Validate eagerly so encode is infallible later.
        encode_name(file_name)?;
        Ok(Self {
            file_name: file_name.to_string(),
            start_record_id,
            end_record_id: 0,
            content_bytes_length: 0,
        })
    }

    /// Segment data file name (without directory).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// First record id held by this segment.
    pub fn start_record_id(&self) -> u32 {
        self.start_record_id
    }

    /// Last record id appended to this segment so far.
    pub fn end_record_id(&self) -> u32 {
        self.end_record_id
    }

    /// Header+body bytes accumulated in this segment's data file.
    pub fn content_bytes_length(&self) -> u32 {
        self.content_bytes_length
    }

    /// Encode into the fixed 140-byte on-disk layout.
    pub fn encode(&self) -> LogResult<[u8; Self::ENCODED_LEN as usize]> {
        let mut buf = [0u8; Self::ENCODED_LEN as usize];
        let name = encode_name(&self.file_name)?;
        buf[..FILE_NAME_LENGTH_LIMIT].copy_from_slice(&name);
        put_u32(&mut buf[128..132], self.start_record_id);
        put_u32(&mut buf[132..136], self.end_record_id);
        put_u32(&mut buf[136..140], self.content_bytes_length);
        Ok(buf)
    }

    /// Decode from the fixed 140-byte on-disk layout.
    pub fn decode(buf: &[u8]) -> LogResult<Self> {
        if buf.len() != Self::ENCODED_LEN as usize {
            return Err(LogError::Format(format!(
                "topic meta entry must be {} bytes, got {}",
                Self::ENCODED_LEN,
                buf.len()
            )));
        }
        Ok(Self {
            file_name: decode_name(&buf[..FILE_NAME_LENGTH_LIMIT])?,
            start_record_id: get_u32(&buf[128..132]),
            end_record_id: get_u32(&buf[132..136]),
            content_bytes_length: get_u32(&buf[136..140]),
        })
    }
}

/// Index state guarded by one mutation lock: the append-only descriptor
/// vector plus the current read/write pointers into it.
#[derive(Default)]
struct TopicState {
    metas: Vec<TopicMetaData>,
    current_read: Option<usize>,
    current_write: Option<usize>,
}

/// Persisted segment index for one topic, with read/write cursors, the
/// topic's record-id generator, and the write-rolling policy inputs.
pub struct TopicMetaSummary {
    file: Arc<dyn SegmentFile>,
    path: String,
    topic_name: String,
    read_meta_offset: AtomicU32,
    write_meta_offset: AtomicU32,
    max_record_id: AtomicU32,
    segment_size_limit: u32,
    state: Mutex<TopicState>,
    flusher: Mutex<Option<PeriodicFlusher>>,
    closed: AtomicBool,
}

impl TopicMetaSummary {
    /// Open (or create) the topic summary backing file at `path`.
    ///
    /// A pre-existing file is recovered by replaying its header and
    /// descriptor vector; recovery failure is fatal for the owning log.
    /// A fresh file gets its empty header flushed synchronously.
    pub fn open(
        dir: &Arc<dyn Directory>,
        path: &str,
        topic_name: &str,
        segment_size_limit: u32,
        flush_interval: Duration,
    ) -> LogResult<Arc<Self>> {
        let needs_recover = dir.exists(path);
        let file = dir.open_rw(path)?;

        let summary = Arc::new(Self {
            file,
            path: path.to_string(),
            topic_name: topic_name.to_string(),
            read_meta_offset: AtomicU32::new(SUMMARY_BASE_OFFSET),
            write_meta_offset: AtomicU32::new(SUMMARY_BASE_OFFSET),
            max_record_id: AtomicU32::new(0),
            segment_size_limit,
            state: Mutex::new(TopicState::default()),
            flusher: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        if needs_recover {
            if let Err(e) = summary.recover() {
                summary.closed.store(true, Ordering::SeqCst);
                return Err(e);
            }
        } else {
            summary.flush_inner()?;
        }

        let weak = Arc::downgrade(&summary);
        let flusher = PeriodicFlusher::start(path, flush_interval, move || match weak.upgrade() {
            Some(s) => s.flush(),
            None => Ok(()),
        });
        *summary
            .flusher
            .lock()
            .map_err(|_| LogError::poisoned("topic meta flusher"))? = Some(flusher);

        Ok(summary)
    }

    /// Mint the next record id for this topic (increment-then-get).
    ///
    /// The first id handed out is 1; ids are never reused.
    pub fn generate_new_record_id(&self) -> u32 {
        self.max_record_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest record id assigned so far (0 if none).
    pub fn max_record_id(&self) -> u32 {
        self.max_record_id.load(Ordering::SeqCst)
    }

    /// Would appending `incoming_bytes` to the current write segment reach
    /// the per-segment size limit? Evaluated before the write so the limit
    /// is never exceeded on disk. True when no write segment exists yet.
    pub fn may_write_rolling(&self, incoming_bytes: u32) -> LogResult<bool> {
        let state = self.lock_state()?;
        match state.current_write {
            Some(idx) => {
                // An overflowing projection is past any limit.
                let projected = state.metas[idx]
                    .content_bytes_length
                    .checked_add(incoming_bytes);
                Ok(projected.map_or(true, |p| p >= self.segment_size_limit))
            }
            None => Ok(true),
        }
    }

    /// Register `meta` as the new current write segment: persist the
    /// previous segment's trailing fields, append the descriptor at the
    /// write cursor, and advance the cursor.
    pub fn write_rolling(&self, meta: TopicMetaData) -> LogResult<()> {
        let mut state = self.lock_state()?;
        if state.current_write.is_some() {
            self.flush_write_tail(&state)?;
        }

        let position = self.write_meta_offset.load(Ordering::SeqCst);
        self.file.write_all_at(&meta.encode()?, u64::from(position))?;
        self.write_meta_offset
            .fetch_add(TopicMetaData::ENCODED_LEN, Ordering::SeqCst);

        state.metas.push(meta);
        state.current_write = Some(state.metas.len() - 1);
        Ok(())
    }

    /// After a record append: stamp the current write segment's end id and
    /// add the appended bytes to its content length.
    pub fn update_write_meta_info(&self, record_id: u32, bytes_len: u32) -> LogResult<()> {
        let mut state = self.lock_state()?;
        let idx = state.current_write.ok_or_else(|| {
            LogError::InvalidState("no current write segment to update".into())
        })?;
        let meta = &mut state.metas[idx];
        meta.end_record_id = record_id;
        meta.content_bytes_length += bytes_len;
        Ok(())
    }

    /// True exactly when the given open read segment is exhausted.
    pub fn may_read_rolling(&self, read_records: &FileRecords) -> bool {
        read_records.is_read_end()
    }

    /// Advance the read cursor to the next segment descriptor, or `None`
    /// when the current segment is already the last one.
    pub fn read_rolling(&self) -> LogResult<Option<TopicMetaData>> {
        let mut state = self.lock_state()?;
        let index = self.read_index() as usize + 1;
        if index >= state.metas.len() {
            return Ok(None);
        }
        state.current_read = Some(index);
        self.read_meta_offset
            .fetch_add(TopicMetaData::ENCODED_LEN, Ordering::SeqCst);
        Ok(Some(state.metas[index].clone()))
    }

    /// The current read segment descriptor, lazily initialized to the first
    /// descriptor. `None` while the topic has no segments.
    pub fn current_read_meta(&self) -> LogResult<Option<TopicMetaData>> {
        let mut state = self.lock_state()?;
        if state.current_read.is_none() && !state.metas.is_empty() {
            state.current_read = Some(0);
        }
        Ok(state.current_read.map(|i| state.metas[i].clone()))
    }

    /// The current write segment descriptor, lazily initialized to the last
    /// descriptor. `None` while the topic has no segments.
    pub fn current_write_meta(&self) -> LogResult<Option<TopicMetaData>> {
        let mut state = self.lock_state()?;
        if state.current_write.is_none() && !state.metas.is_empty() {
            state.current_write = Some(state.metas.len() - 1);
        }
        Ok(state.current_write.map(|i| state.metas[i].clone()))
    }

    /// Locate the segment owning `record_id` by ascending scan and
    /// reposition the read cursor at it.
    ///
    /// Descriptors are ordered by ascending start id, so an id below the
    /// current descriptor's start cannot exist anywhere.
    pub fn find_meta(&self, record_id: u32) -> LogResult<TopicMetaData> {
        let mut state = self.lock_state()?;
        let mut owner = None;
        for (i, meta) in state.metas.iter().enumerate() {
            if record_id < meta.start_record_id {
                return Err(LogError::MetaNotFound(record_id));
            }
            if record_id <= meta.end_record_id {
                owner = Some(i);
                break;
            }
        }
        let Some(i) = owner else {
            return Err(LogError::MetaNotFound(record_id));
        };
        self.read_meta_offset.store(
            SUMMARY_BASE_OFFSET + i as u32 * TopicMetaData::ENCODED_LEN,
            Ordering::SeqCst,
        );
        state.current_read = Some(i);
        Ok(state.metas[i].clone())
    }

    /// Current read cursor as a descriptor index.
    pub fn read_index(&self) -> u32 {
        (self.read_meta_offset.load(Ordering::SeqCst) - SUMMARY_BASE_OFFSET)
            / TopicMetaData::ENCODED_LEN
    }

    /// Number of segment descriptors.
    pub fn segment_count(&self) -> usize {
        self.lock_state().map(|s| s.metas.len()).unwrap_or(0)
    }

    /// Snapshot of all segment descriptors, in segment order.
    pub fn segment_metas(&self) -> LogResult<Vec<TopicMetaData>> {
        Ok(self.lock_state()?.metas.clone())
    }

    /// The topic this summary belongs to.
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    /// Persist the header cursors and the current write descriptor's
    /// trailing fields. No-op after close; safe from the flush timer.
    pub fn flush(&self) -> LogResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.flush_inner()
    }

    fn flush_inner(&self) -> LogResult<()> {
        let mut header = [0u8; SUMMARY_BASE_OFFSET as usize];
        put_u32(&mut header[0..4], self.read_meta_offset.load(Ordering::SeqCst));
        put_u32(&mut header[4..8], self.write_meta_offset.load(Ordering::SeqCst));
        put_u32(&mut header[8..12], self.max_record_id.load(Ordering::SeqCst));
        self.file.write_all_at(&header, 0)?;

        let state = self.lock_state()?;
        self.flush_write_tail(&state)?;
        drop(state);

        self.file.flush()?;
        Ok(())
    }

    /// Re-persist the trailing fields (end id, content length) of the
    /// current write descriptor at its known slot: the last appended
    /// descriptor starts at `write_meta_offset - ENCODED_LEN`, and its
    /// trailing fields sit past the name field and start id.
    fn flush_write_tail(&self, state: &TopicState) -> LogResult<()> {
        let Some(idx) = state.current_write else {
            return Ok(());
        };
        let meta = &state.metas[idx];
        let position = self.write_meta_offset.load(Ordering::SeqCst) - TopicMetaData::ENCODED_LEN
            + FILE_NAME_LENGTH_LIMIT as u32
            + INT_BYTES;
        let mut tail = [0u8; 2 * INT_BYTES as usize];
        put_u32(&mut tail[0..4], meta.end_record_id);
        put_u32(&mut tail[4..8], meta.content_bytes_length);
        self.file.write_all_at(&tail, u64::from(position))?;
        Ok(())
    }

    fn recover(&self) -> LogResult<()> {
        let mut header = [0u8; SUMMARY_BASE_OFFSET as usize];
        self.file.read_exact_at(&mut header, 0)?;
        self.read_meta_offset
            .store(get_u32(&header[0..4]), Ordering::SeqCst);
        self.write_meta_offset
            .store(get_u32(&header[4..8]), Ordering::SeqCst);
        self.max_record_id
            .store(get_u32(&header[8..12]), Ordering::SeqCst);

        let mut state = self.lock_state()?;
        state.metas.clear();

        let end = self.write_meta_offset.load(Ordering::SeqCst);
        let mut offset = SUMMARY_BASE_OFFSET;
        let mut buf = [0u8; TopicMetaData::ENCODED_LEN as usize];
        while offset < end {
            self.file.read_exact_at(&mut buf, u64::from(offset))?;
            state.metas.push(TopicMetaData::decode(&buf)?);
            offset += TopicMetaData::ENCODED_LEN;
        }

        if !state.metas.is_empty() {
            // A recovered read cursor past the end clamps to the last
            // descriptor so read rolling resumes from a real segment.
            let read_idx = (self.read_index() as usize).min(state.metas.len() - 1);
            state.current_read = Some(read_idx);
            state.current_write = Some(state.metas.len() - 1);
        }

        debug!(
            topic = %self.topic_name,
            path = %self.path,
            segments = state.metas.len(),
            max_record_id = self.max_record_id.load(Ordering::SeqCst),
            "recovered topic meta summary"
        );
        Ok(())
    }

    fn lock_state(&self) -> LogResult<std::sync::MutexGuard<'_, TopicState>> {
        self.state
            .lock()
            .map_err(|_| LogError::poisoned("topic meta index"))
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
        if let Err(e) = self.flush_inner() {
            warn!(topic = %self.topic_name, path = %self.path, error = %e, "final topic meta flush failed");
        }
    }
}
