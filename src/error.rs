//! Error types for `kubrick-log`.

use std::path::PathBuf;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors returned by the `kubrick-log` crate.
#[derive(thiserror::Error, Debug)]
pub enum LogError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file exists but lacks required access, or the handle was
    /// closed when an operation was attempted.
    #[error("access error: {0}")]
    Access(String),

    /// An append would push a segment past its configured size limit.
    #[error("segment {file} is full (offset {offset}, incoming {incoming}, limit {limit})")]
    SegmentFull {
        /// Segment data file name.
        file: String,
        /// Current write offset in the data file.
        offset: u32,
        /// Bytes the rejected append would have added.
        incoming: u32,
        /// Configured per-segment content size limit.
        limit: u32,
    },

    /// No segment descriptor covers the requested record id.
    #[error("no segment metadata found for record id {0}")]
    MetaNotFound(u32),

    /// Format error (corrupt, unexpected, unsupported, malformed construction).
    #[error("format error: {0}")]
    Format(String),

    /// Invalid state (operation not allowed in current state).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Lock acquisition failed (poisoned lock).
    #[error("lock failed on {resource}: {reason}")]
    LockFailed {
        /// What we were trying to lock (file path, index vector, etc.).
        resource: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Requested path does not exist.
    #[error("missing path: {0}")]
    MissingPath(PathBuf),
}

impl LogError {
    pub(crate) fn poisoned(resource: &str) -> Self {
        LogError::LockFailed {
            resource: resource.to_string(),
            reason: "lock poisoned".to_string(),
        }
    }
}
