//! Where the collection bytes live.
//!
//! The file backend is what runs in production. The in-memory backend backs
//! tests and dry runs, and can be told to fail its commits.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Whole-file storage for one collection. Reads return `None` when nothing
/// has been stored yet; `replace` is all-or-nothing.
pub trait StoreBackend: Send + Sync {
    fn read(&self) -> Result<Option<Vec<u8>>>;

    fn replace(&self, bytes: &[u8]) -> Result<()>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// Write `bytes` to `path` through a sibling temp file, fsync, then rename
/// over the target. Readers see either the old file or the new one.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    atomic_write_with(path, |file| file.write_all(bytes))
}

pub(crate) fn atomic_write_with<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut NamedTempFile) -> io::Result<()>,
{
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    // Dropping the temp file on any error below removes it.
    let mut tmp = NamedTempFile::new_in(parent)?;
    write(&mut tmp)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "atomic write complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// FileBackend (production)
// ---------------------------------------------------------------------------

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace through a custom writer, for exercising mid-write failures.
    #[cfg(test)]
    pub(crate) fn replace_with<F>(&self, write: F) -> Result<()>
    where
        F: FnOnce(&mut NamedTempFile) -> io::Result<()>,
    {
        atomic_write_with(&self.path, write)
            .map_err(|e| StoreError::Commit(format!("{}: {e}", self.path.display())))
    }
}

impl StoreBackend for FileBackend {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn replace(&self, bytes: &[u8]) -> Result<()> {
        atomic_write(&self.path, bytes)
            .map_err(|e| StoreError::Commit(format!("{}: {e}", self.path.display())))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend (tests, dry runs)
// ---------------------------------------------------------------------------

/// In-memory store. Thread-safe. `failing()` builds one whose commits
/// always fail without touching the held bytes; `set_fail_reads` makes
/// loads fail the way an unreadable file does.
#[derive(Default)]
pub struct MemoryBackend {
    bytes: Mutex<Option<Vec<u8>>>,
    fail_commits: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes.into())),
            fail_commits: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        let backend = Self::new();
        backend.set_fail_commits(true);
        backend
    }

    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Current contents (for test assertions).
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.bytes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl StoreBackend for MemoryBackend {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read {
                path: PathBuf::from("memory"),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "simulated read failure"),
            });
        }
        Ok(self.snapshot())
    }

    fn replace(&self, bytes: &[u8]) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Commit("simulated commit failure".into()));
        }
        *self.bytes.lock().unwrap_or_else(|e| e.into_inner()) = Some(bytes.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
