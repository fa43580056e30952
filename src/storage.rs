//! Storage abstraction for segment and summary files.
//!
//! The log performs offset-addressed reads and writes against files that are
//! simultaneously readable and writable, so the backend surface here is a
//! positioned-I/O handle rather than streaming `Read`/`Write` pairs.
//!
//! Vocabulary note:
//! - `flush()` is a visibility boundary (userspace buffers to the OS), not a
//!   stable-storage guarantee.
//! - Positioned reads against a handle that is still being written must
//!   observe all writes that completed before the read was issued.

use crate::error::{LogError, LogResult};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// One open file supporting positioned reads and writes.
///
/// Handles are shared (`Arc`) between read and write paths; implementations
/// must allow concurrent positioned access from multiple threads.
pub trait SegmentFile: Send + Sync + std::fmt::Debug {
    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> LogResult<()>;
    /// Write all of `buf` starting at `offset`, extending the file if needed.
    fn write_all_at(&self, buf: &[u8], offset: u64) -> LogResult<()>;
    /// Push userspace buffers to the OS.
    fn flush(&self) -> LogResult<()>;
}

/// Trait for directory-like storage backends.
pub trait Directory: Send + Sync {
    /// Open `path` for positioned read/write, creating it if absent.
    ///
    /// Fails with [`LogError::Access`] if the file exists but cannot be
    /// opened with both read and write capability.
    fn open_rw(&self, path: &str) -> LogResult<Arc<dyn SegmentFile>>;
    /// Return whether a path exists.
    fn exists(&self, path: &str) -> bool;
    /// Create a directory (and parents if needed).
    fn create_dir_all(&self, path: &str) -> LogResult<()>;
    /// Optional filesystem path for backends that support it.
    fn file_path(&self, path: &str) -> Option<PathBuf>;
}

/// Filesystem-backed `Directory` rooted at a local path.
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Create (or open) a filesystem directory backend rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> LogResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Directory for FsDirectory {
    fn open_rw(&self, path: &str) -> LogResult<Arc<dyn SegmentFile>> {
        let full_path = self.resolve_path(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if full_path.exists() {
            let meta = std::fs::metadata(&full_path)?;
            if !meta.is_file() || meta.permissions().readonly() {
                return Err(LogError::Access(format!(
                    "file {} cannot be opened read/write",
                    full_path.display()
                )));
            }
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&full_path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => LogError::Access(format!(
                    "file {} cannot be opened read/write: {e}",
                    full_path.display()
                )),
                _ => LogError::Io(e),
            })?;
        Ok(Arc::new(FsSegmentFile {
            file: Mutex::new(file),
        }))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve_path(path).exists()
    }

    fn create_dir_all(&self, path: &str) -> LogResult<()> {
        std::fs::create_dir_all(self.resolve_path(path))?;
        Ok(())
    }

    fn file_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve_path(path))
    }
}

/// Positioned-I/O wrapper over one `std::fs::File`.
///
/// Seek-then-read under a mutex keeps this portable; positioned calls from
/// the flush timer and the foreground thread serialize here.
#[derive(Debug)]
struct FsSegmentFile {
    file: Mutex<std::fs::File>,
}

impl SegmentFile for FsSegmentFile {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> LogResult<()> {
        let mut file = self.file.lock().map_err(|_| LogError::poisoned("fs segment file"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> LogResult<()> {
        let mut file = self.file.lock().map_err(|_| LogError::poisoned("fs segment file"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn flush(&self) -> LogResult<()> {
        let mut file = self.file.lock().map_err(|_| LogError::poisoned("fs segment file"))?;
        file.flush()?;
        Ok(())
    }
}

/// In-memory `Directory` used for tests.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    files: Arc<RwLock<HashMap<String, Arc<MemorySegmentFile>>>>,
}

impl MemoryDirectory {
    /// Create an empty in-memory directory.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Directory for MemoryDirectory {
    fn open_rw(&self, path: &str) -> LogResult<Arc<dyn SegmentFile>> {
        let mut files = self
            .files
            .write()
            .map_err(|_| LogError::poisoned("memory directory"))?;
        let file = files
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(MemorySegmentFile::default()))
            .clone();
        Ok(file)
    }

    fn exists(&self, path: &str) -> bool {
        self.files
            .read()
            .map(|f| f.contains_key(path))
            .unwrap_or(false)
    }

    fn create_dir_all(&self, _path: &str) -> LogResult<()> {
        Ok(())
    }

    fn file_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Default)]
struct MemorySegmentFile {
    data: RwLock<Vec<u8>>,
}

impl SegmentFile for MemorySegmentFile {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> LogResult<()> {
        let data = self
            .data
            .read()
            .map_err(|_| LogError::poisoned("memory segment file"))?;
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(LogError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read past end of file (offset {offset}, len {})", buf.len()),
            )));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> LogResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|_| LogError::poisoned("memory segment file"))?;
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> LogResult<()> {
        Ok(())
    }
}
