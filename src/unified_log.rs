//! Per-topic append-only log composed of size-bounded segments.
//!
//! ## Public invariants
//!
//! - Record ids within a topic are strictly increasing, starting at 1, and
//!   assigned only by the topic summary.
//! - Segment data files are named `NNNN_Kubrick.log` with a zero-padded,
//!   strictly incrementing numeric prefix; the topic summary lives in
//!   `Kubrick_summary.log` inside the topic directory.
//! - Rolling is decided before a write, so no data file exceeds the
//!   configured segment size limit.
//! - When the read cursor sits on the segment currently being written, both
//!   sides share one open handle; records appended after the reader caught
//!   up become readable without reopening anything.

use crate::error::{LogError, LogResult};
use crate::file_records::FileRecords;
use crate::formats::{
    DEFAULT_FLUSH_INTERVAL, DEFAULT_SEGMENT_SIZE_LIMIT, INT_BYTES, SEGMENT_FILE_SUFFIX,
    TOPIC_SUMMARY_FILE,
};
use crate::record::Record;
use crate::storage::Directory;
use crate::topic_meta::{TopicMetaData, TopicMetaSummary};
use std::sync::Arc;
use std::time::Duration;

/// Tunables for one log instance.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Per-segment data file size limit in bytes. Rolling happens when an
    /// incoming record would make the current segment reach this size.
    pub segment_size_limit_bytes: u32,
    /// Interval of the background metadata flush timers.
    pub flush_interval: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            segment_size_limit_bytes: DEFAULT_SEGMENT_SIZE_LIMIT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// The per-topic log: one topic summary plus lazily opened read and write
/// segment handles.
///
/// All mutating operations take `&mut self`; concurrent use of one log
/// instance is coordinated by the caller, while background metadata flushes
/// stay safe through the summaries' internal synchronization.
pub struct UnifiedLog {
    dir: Arc<dyn Directory>,
    topic_name: String,
    summary: Arc<TopicMetaSummary>,
    read_records: Option<Arc<FileRecords>>,
    write_records: Option<Arc<FileRecords>>,
    config: LogConfig,
    closed: bool,
}

impl UnifiedLog {
    /// Open (or create) the log for `topic_name` with default tunables.
    pub fn open(dir: Arc<dyn Directory>, topic_name: &str) -> LogResult<Self> {
        Self::with_options(dir, topic_name, LogConfig::default())
    }

    /// Open (or create) the log for `topic_name`.
    ///
    /// The topic directory and summary file are created if absent; an
    /// existing summary is recovered, and recovery failure fails the open.
    pub fn with_options(
        dir: Arc<dyn Directory>,
        topic_name: &str,
        config: LogConfig,
    ) -> LogResult<Self> {
        dir.create_dir_all(topic_name)?;
        let summary_path = format!("{topic_name}/{TOPIC_SUMMARY_FILE}");
        let summary = TopicMetaSummary::open(
            &dir,
            &summary_path,
            topic_name,
            config.segment_size_limit_bytes,
            config.flush_interval,
        )?;
        Ok(Self {
            dir,
            topic_name: topic_name.to_string(),
            summary,
            read_records: None,
            write_records: None,
            config,
            closed: false,
        })
    }

    /// Append one record, returning the number of data-file bytes written
    /// (id header plus payload). The assigned id is the new value of
    /// [`Self::max_record_id`].
    ///
    /// The id is minted before rolling so a record that triggers a roll
    /// becomes the first record of the new segment.
    pub fn append(&mut self, payload: &[u8]) -> LogResult<u32> {
        self.ensure_open()?;
        let body_size = u32::try_from(payload.len()).map_err(|_| {
            LogError::Format(format!("payload of {} bytes exceeds u32", payload.len()))
        })?;
        let incoming = INT_BYTES.checked_add(body_size).ok_or_else(|| {
            LogError::Format(format!(
                "record frame for a {body_size}-byte payload overflows u32"
            ))
        })?;

        let record_id = self.summary.generate_new_record_id();
        self.rolling_writer(record_id, incoming)?;

        let writer = self.write_records.as_ref().ok_or_else(|| {
            LogError::InvalidState("write rolling produced no write segment".into())
        })?;
        let appended = writer.append_one(record_id, payload)?;
        self.summary.update_write_meta_info(record_id, appended)?;
        Ok(appended)
    }

    /// Append a batch of records in order, returning the total bytes
    /// written across all of them.
    pub fn append_batch<I, P>(&mut self, payloads: I) -> LogResult<u64>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut total = 0u64;
        for payload in payloads {
            total += u64::from(self.append(payload.as_ref())?);
        }
        Ok(total)
    }

    /// Read the record at the read cursor and advance the cursor, rolling
    /// to the next segment when the current one is exhausted. `None` means
    /// the reader has caught up with everything written so far.
    pub fn read_next(&mut self) -> LogResult<Option<Record>> {
        self.ensure_open()?;
        self.rolling_reader()?;
        match &self.read_records {
            Some(records) => records.make_next(),
            None => Ok(None),
        }
    }

    /// True when the read cursor has caught up with the write cursor.
    pub fn is_read_end(&mut self) -> LogResult<bool> {
        self.ensure_open()?;
        self.rolling_reader()?;
        Ok(match &self.read_records {
            Some(records) => records.is_read_end(),
            None => true,
        })
    }

    /// Iterate records from the current read cursor to the end of the log.
    pub fn iter(&mut self) -> LogIterator<'_> {
        LogIterator { log: self }
    }

    /// Reposition the read cursor at the record with id `record_id`; the
    /// next read returns exactly that record.
    ///
    /// Fails with [`LogError::MetaNotFound`] when no segment holds the id.
    pub fn reset(&mut self, record_id: u32) -> LogResult<()> {
        self.ensure_open()?;
        let meta = self.summary.find_meta(record_id)?;

        let reuse = matches!(&self.read_records, Some(r) if r.file_name() == meta.file_name());
        if !reuse {
            if let Some(old) = self.read_records.take() {
                self.close_read_handle(old);
            }
            self.read_records = Some(self.open_segment(&meta)?);
        }

        let records = self.read_records.as_ref().ok_or_else(|| {
            LogError::InvalidState("reset produced no read segment".into())
        })?;
        // Ids inside one segment are contiguous from its start id.
        records.reset_read_index(record_id - meta.start_record_id())
    }

    /// Highest record id assigned so far (0 if the topic is empty).
    pub fn max_record_id(&self) -> u32 {
        self.summary.max_record_id()
    }

    /// The topic this log belongs to.
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    /// Snapshot of the topic's segment descriptors, in segment order.
    pub fn segments(&self) -> LogResult<Vec<TopicMetaData>> {
        self.summary.segment_metas()
    }

    /// Flush all metadata and data buffers synchronously.
    pub fn flush(&self) -> LogResult<()> {
        if self.closed {
            return Ok(());
        }
        self.summary.flush()?;
        if let Some(r) = &self.read_records {
            r.flush()?;
        }
        if let Some(w) = &self.write_records {
            if !Self::aliased(&self.read_records, w) {
                w.flush()?;
            }
        }
        Ok(())
    }

    /// Flush and close the summary and both segment handles. Idempotent;
    /// the log is unusable afterwards.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.summary.close();
        if let Some(r) = self.read_records.take() {
            r.close();
        }
        // Segment close is idempotent, so an aliased handle is safe here.
        if let Some(w) = self.write_records.take() {
            w.close();
        }
    }

    /// Make `write_records` point at a segment with room for an incoming
    /// record of `incoming_bytes`, rolling a fresh segment when needed.
    fn rolling_writer(&mut self, record_id: u32, incoming_bytes: u32) -> LogResult<()> {
        let mut need_rolling = false;

        if self.write_records.is_none() {
            match self.summary.current_write_meta()? {
                Some(meta) => self.write_records = Some(self.open_segment(&meta)?),
                None => need_rolling = true,
            }
        }

        if !need_rolling {
            need_rolling = self.summary.may_write_rolling(incoming_bytes)?;
        }
        if !need_rolling {
            return Ok(());
        }

        let file_name = self.next_segment_name()?;
        let meta = TopicMetaData::new(&file_name, record_id)?;
        self.summary.write_rolling(meta)?;

        if let Some(old) = self.write_records.take() {
            // A handle shared with the reader stays open; the reader closes
            // it when it rolls past the segment.
            if !Self::aliased(&self.read_records, &old) {
                old.close();
            }
        }
        self.write_records = Some(FileRecords::open(
            &self.dir,
            &self.topic_name,
            &file_name,
            self.config.segment_size_limit_bytes,
            self.config.flush_interval,
        )?);
        Ok(())
    }

    /// Make `read_records` point at the segment under the read cursor,
    /// advancing past exhausted segments.
    fn rolling_reader(&mut self) -> LogResult<()> {
        if self.read_records.is_none() {
            match self.summary.current_read_meta()? {
                Some(meta) => self.read_records = Some(self.open_segment(&meta)?),
                None => return Ok(()),
            }
        }

        let exhausted = match &self.read_records {
            Some(records) => self.summary.may_read_rolling(records),
            None => return Ok(()),
        };
        if !exhausted {
            return Ok(());
        }

        match self.summary.read_rolling()? {
            Some(meta) => {
                if let Some(old) = self.read_records.take() {
                    self.close_read_handle(old);
                }
                let records = self.open_segment(&meta)?;
                // A reopened segment carries a persisted cursor; a fresh
                // roll always starts from its first record.
                records.reset_read_index(0)?;
                self.read_records = Some(records);
            }
            // Last segment: keep the handle so appends landing in it
            // become readable without reopening.
            None => {}
        }
        Ok(())
    }

    /// Open the segment `meta` describes, reusing either already-open
    /// handle when the cursors share a segment. One file must never be
    /// backed by two `FileRecords` instances: their record indices would
    /// drift apart and flush conflicting headers.
    fn open_segment(&self, meta: &TopicMetaData) -> LogResult<Arc<FileRecords>> {
        for slot in [&self.write_records, &self.read_records] {
            if let Some(held) = slot {
                if held.file_name() == meta.file_name() {
                    return Ok(held.clone());
                }
            }
        }
        FileRecords::open(
            &self.dir,
            &self.topic_name,
            meta.file_name(),
            self.config.segment_size_limit_bytes,
            self.config.flush_interval,
        )
    }

    /// Close a read handle unless the writer still shares it.
    fn close_read_handle(&self, old: Arc<FileRecords>) {
        if !Self::aliased(&self.write_records, &old) {
            old.close();
        }
    }

    fn aliased(slot: &Option<Arc<FileRecords>>, other: &Arc<FileRecords>) -> bool {
        matches!(slot, Some(held) if Arc::ptr_eq(held, other))
    }

    /// Next segment file name: numeric prefix of the current write segment
    /// plus one, or 0 for the topic's first segment.
    fn next_segment_name(&self) -> LogResult<String> {
        let next_id = match self.summary.current_write_meta()? {
            Some(meta) => {
                let name = meta.file_name();
                let prefix = name.strip_suffix(SEGMENT_FILE_SUFFIX).ok_or_else(|| {
                    LogError::Format(format!("segment file name {name} has no recognized suffix"))
                })?;
                prefix.parse::<u32>().map_err(|_| {
                    LogError::Format(format!("segment file name {name} has no numeric prefix"))
                })? + 1
            }
            None => 0,
        };
        Ok(format!("{next_id:04}{SEGMENT_FILE_SUFFIX}"))
    }

    fn ensure_open(&self) -> LogResult<()> {
        if self.closed {
            return Err(LogError::InvalidState(format!(
                "log for topic {} is closed",
                self.topic_name
            )));
        }
        Ok(())
    }
}

impl Drop for UnifiedLog {
    fn drop(&mut self) {
        self.close();
    }
}

/// Borrow-based cursor over the unread tail of the log.
pub struct LogIterator<'a> {
    log: &'a mut UnifiedLog,
}

impl LogIterator<'_> {
    /// True when another record is available.
    pub fn has_next(&mut self) -> LogResult<bool> {
        Ok(!self.log.is_read_end()?)
    }

    /// Reposition at `record_id`; the next item is exactly that record.
    pub fn reset(&mut self, record_id: u32) -> LogResult<()> {
        self.log.reset(record_id)
    }
}

impl Iterator for LogIterator<'_> {
    type Item = LogResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.log.read_next().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDirectory;

    fn memory_dir() -> Arc<dyn Directory> {
        Arc::new(MemoryDirectory::new())
    }

    fn tiny_config() -> LogConfig {
        LogConfig {
            // Two 9-byte frames per segment: 18 + 9 >= 20 rolls.
            segment_size_limit_bytes: 20,
            flush_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn append_returns_bytes_written_ids_count_from_one() {
        let mut log = UnifiedLog::open(memory_dir(), "ids").unwrap();
        assert_eq!(log.append(b"a").unwrap(), 5);
        assert_eq!(log.max_record_id(), 1);
        assert_eq!(log.append(b"bc").unwrap(), 6);
        assert_eq!(log.max_record_id(), 2);
    }

    #[test]
    fn roundtrip_preserves_order_and_payloads() {
        let mut log =
            UnifiedLog::with_options(memory_dir(), "roundtrip", tiny_config()).unwrap();
        let payloads: Vec<Vec<u8>> =
            (0..10).map(|i| format!("msg-{i}").into_bytes()).collect();
        let written = log.append_batch(&payloads).unwrap();
        assert_eq!(written, 90);

        for (expected_id, expected_payload) in (1u32..=10).zip(&payloads) {
            let record = log.read_next().unwrap().unwrap();
            assert_eq!(record.id(), expected_id);
            assert_eq!(record.payload(), expected_payload.as_slice());
        }
        assert!(log.read_next().unwrap().is_none());
        assert!(log.is_read_end().unwrap());
    }

    #[test]
    fn rolling_splits_into_expected_segments() {
        let mut log = UnifiedLog::with_options(memory_dir(), "rolling", tiny_config()).unwrap();
        for i in 0..10 {
            log.append(format!("msg-{i}").as_bytes()).unwrap();
        }

        let segments = log.segments().unwrap();
        assert_eq!(segments.len(), 5);
        for (i, seg) in segments.iter().enumerate() {
            assert_eq!(seg.file_name(), format!("{i:04}_Kubrick.log"));
            assert_eq!(seg.start_record_id(), i as u32 * 2 + 1);
            assert_eq!(seg.end_record_id(), i as u32 * 2 + 2);
            assert_eq!(seg.content_bytes_length(), 18);
        }
    }

    #[test]
    fn reset_replays_from_the_requested_record() {
        let mut log = UnifiedLog::with_options(memory_dir(), "reset", tiny_config()).unwrap();
        for i in 0..10 {
            log.append(format!("msg-{i}").as_bytes()).unwrap();
        }
        while log.read_next().unwrap().is_some() {}

        let mut it = log.iter();
        it.reset(9).unwrap();
        assert!(it.has_next().unwrap());
        let records: Vec<Record> = it.collect::<LogResult<_>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload(), b"msg-8");
        assert_eq!(records[1].payload(), b"msg-9");
    }

    #[test]
    fn reset_to_unknown_id_is_meta_not_found() {
        let mut log = UnifiedLog::open(memory_dir(), "missing").unwrap();
        log.append(b"only").unwrap();
        assert!(matches!(log.reset(0), Err(LogError::MetaNotFound(0))));
        assert!(matches!(log.reset(7), Err(LogError::MetaNotFound(7))));
    }

    #[test]
    fn reader_observes_appends_on_the_live_write_segment() {
        let mut log = UnifiedLog::open(memory_dir(), "live").unwrap();
        log.append(b"first").unwrap();
        assert_eq!(log.read_next().unwrap().unwrap().payload(), b"first");
        assert!(log.read_next().unwrap().is_none());

        // Same segment, no reopen: the shared handle sees the new record.
        log.append(b"second").unwrap();
        assert!(!log.is_read_end().unwrap());
        assert_eq!(log.read_next().unwrap().unwrap().payload(), b"second");
    }

    #[test]
    fn rolling_past_a_shared_segment_keeps_the_writer_alive() {
        let mut log = UnifiedLog::with_options(memory_dir(), "shared", tiny_config()).unwrap();
        log.append(b"msg-0").unwrap();
        // Reader catches up on segment 0 while it is still the writer.
        assert_eq!(log.read_next().unwrap().unwrap().id(), 1);
        assert!(log.read_next().unwrap().is_none());

        // Fill segment 0 and roll into segment 1, then keep writing.
        for i in 1..4 {
            log.append(format!("msg-{i}").as_bytes()).unwrap();
        }
        let ids: Vec<u32> = log.iter().map(|r| r.unwrap().id()).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn writer_reuses_a_read_handle_opened_first() {
        let dir = memory_dir();
        {
            let mut log = UnifiedLog::open(dir.clone(), "reuse").unwrap();
            log.append(b"msg-0").unwrap();
            log.close();
        }

        // Reopen, read before writing: the read side opens the segment
        // first, and the lazily reopened writer must share that handle.
        let mut log = UnifiedLog::open(dir, "reuse").unwrap();
        assert_eq!(log.read_next().unwrap().unwrap().id(), 1);
        log.append(b"msg-1").unwrap();
        let record = log.read_next().unwrap().unwrap();
        assert_eq!((record.id(), record.payload()), (2, b"msg-1".as_slice()));
    }

    #[test]
    fn no_records_lost_after_reopen_read_then_append_across_rolls() {
        let dir = memory_dir();
        {
            let mut log = UnifiedLog::with_options(dir.clone(), "reuse", tiny_config()).unwrap();
            log.append(b"msg-0").unwrap();
            log.close();
        }

        let mut log = UnifiedLog::with_options(dir, "reuse", tiny_config()).unwrap();
        assert_eq!(log.read_next().unwrap().unwrap().id(), 1);
        for i in 1..5 {
            log.append(format!("msg-{i}").as_bytes()).unwrap();
        }
        let ids: Vec<u32> = log.iter().map(|r| r.unwrap().id()).collect();
        assert_eq!(ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn close_does_not_wait_for_the_flush_timer() {
        let mut log = UnifiedLog::open(memory_dir(), "latency").unwrap();
        log.append(b"x").unwrap();
        log.read_next().unwrap().unwrap();

        let start = std::time::Instant::now();
        log.close();
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "close took {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn reopen_resumes_ids_segments_and_read_cursor() {
        let dir = memory_dir();
        {
            let mut log =
                UnifiedLog::with_options(dir.clone(), "recover", tiny_config()).unwrap();
            for i in 0..6 {
                log.append(format!("msg-{i}").as_bytes()).unwrap();
            }
            for _ in 0..3 {
                log.read_next().unwrap().unwrap();
            }
            log.close();
        }

        let mut log = UnifiedLog::with_options(dir, "recover", tiny_config()).unwrap();
        assert_eq!(log.max_record_id(), 6);
        assert_eq!(log.segments().unwrap().len(), 3);

        // Reading resumes after the last consumed record.
        let ids: Vec<u32> = log.iter().map(|r| r.unwrap().id()).collect();
        assert_eq!(ids, vec![4, 5, 6]);

        // New appends continue the id sequence and the segment numbering.
        log.append(b"msg-6").unwrap();
        assert_eq!(log.max_record_id(), 7);
        let segments = log.segments().unwrap();
        assert_eq!(
            segments.last().unwrap().file_name(),
            format!("{:04}_Kubrick.log", segments.len() - 1)
        );
    }

    #[test]
    fn operations_after_close_fail() {
        let mut log = UnifiedLog::open(memory_dir(), "closed").unwrap();
        log.append(b"x").unwrap();
        log.close();
        log.close();
        assert!(matches!(log.append(b"y"), Err(LogError::InvalidState(_))));
        assert!(matches!(log.read_next(), Err(LogError::InvalidState(_))));
        assert!(log.flush().is_ok());
    }
}
