//! Cache persistence backends.
//!
//! The whole cache map is serialized as one JSON blob kept under a single
//! fixed location. `CacheStorage` abstracts that blob store so the cache
//! can run over a file in production and over memory in tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{QueryError, Result};

/// File name of the persisted blob under the storage directory.
const CACHE_FILE: &str = "responses.json";

/// A byte-blob store addressed by one fixed key.
pub trait CacheStorage: Send + Sync {
    /// Load the serialized blob. Returns `None` when absent or unreadable.
    fn load(&self) -> Option<String>;

    /// Persist the serialized blob, replacing any previous contents.
    fn store(&self, blob: &str) -> Result<()>;
}

/// File-backed storage. Keeps the blob at a fixed path, by default
/// `~/.picoquery/cache/responses.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Storage rooted at an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at the canonical per-user location.
    pub fn default_path() -> Self {
        let path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".picoquery")
            .join("cache")
            .join(CACHE_FILE);
        Self { path }
    }

    /// The file path this storage reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStorage for FileStorage {
    fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => Some(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("failed to read cache blob {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn store(&self, blob: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                QueryError::Storage(format!("create {}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(&self.path, blob)
            .map_err(|e| QueryError::Storage(format!("write {}: {}", self.path.display(), e)))
    }
}

/// In-memory storage, shared between clones. Backs tests and any caller
/// that wants a cache without a disk footprint.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blob: Arc<Mutex<Option<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryStorage {
    fn load(&self) -> Option<String> {
        self.blob.lock().expect("storage lock poisoned").clone()
    }

    fn store(&self, blob: &str) -> Result<()> {
        *self.blob.lock().expect("storage lock poisoned") = Some(blob.to_string());
        Ok(())
    }
}
