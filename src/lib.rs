//! `kubrick-log`: a per-topic append-only log built from size-bounded
//! segment files.
//!
//! Scope:
//! - directory abstraction with positioned I/O (`storage`)
//! - on-disk framing constants (`formats`)
//! - per-segment data file plus record index (`file_records`, `record_meta`)
//! - per-topic segment index and record-id generator (`topic_meta`)
//! - the log itself: append, ordered read, reset, rolling (`unified_log`)
//!
//! Non-goal: payload interpretation, checksumming, or compaction. Payloads
//! are opaque byte slices; integrity beyond "every indexed record is fully
//! written" belongs to callers.
//!
//! ## Contract (what you can rely on)
//!
//! - **Ordered, identified appends**: each record gets a strictly
//!   increasing per-topic id starting at 1, and reads return records in
//!   exactly append order.
//! - **Bounded segments**: no segment data file ever exceeds the configured
//!   size limit; rolling is decided before the write.
//! - **Resumable reads**: read progress is persisted, so a reopened log
//!   continues after the last consumed record; [`UnifiedLog::reset`]
//!   rewinds to any retained record id.
//! - **Recoverable metadata**: index entries are written synchronously, so
//!   an unclean shutdown loses at most one flush interval of cursor
//!   movement, never indexed records below the recovered write cursor.
//!
//! Terminology:
//! - `flush()` is a visibility boundary (userspace buffers to the OS), not
//!   a stable-storage guarantee.
//! - A "segment" is one data file plus its sibling `.meta` record index.

pub mod codec;
pub mod error;
pub mod file_records;
pub mod flusher;
pub mod formats;
pub mod record;
pub mod record_meta;
pub mod storage;
pub mod topic_meta;
pub mod unified_log;

pub use error::{LogError, LogResult};
pub use record::Record;
pub use storage::{Directory, FsDirectory, MemoryDirectory};
pub use unified_log::{LogConfig, UnifiedLog};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn append_read_reset_roundtrip_in_memory() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let mut log = UnifiedLog::open(dir, "orders").unwrap();

        assert_eq!(log.append(b"created").unwrap(), 11);
        assert_eq!(log.append(b"paid").unwrap(), 8);
        assert_eq!(log.max_record_id(), 2);

        let first = log.read_next().unwrap().unwrap();
        assert_eq!((first.id(), first.payload()), (1, b"created".as_slice()));
        let second = log.read_next().unwrap().unwrap();
        assert_eq!((second.id(), second.payload()), (2, b"paid".as_slice()));
        assert!(log.read_next().unwrap().is_none());

        log.reset(2).unwrap();
        assert_eq!(log.read_next().unwrap().unwrap().id(), 2);
    }

    #[test]
    fn on_disk_log_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path()).unwrap());

        {
            let mut log = UnifiedLog::open(dir.clone(), "orders").unwrap();
            log.append(b"created").unwrap();
            log.append(b"paid").unwrap();
            log.close();
        }

        let mut log = UnifiedLog::open(dir, "orders").unwrap();
        assert_eq!(log.max_record_id(), 2);
        let ids: Vec<u32> = log.iter().map(|r| r.unwrap().id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
