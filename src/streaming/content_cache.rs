//! In-memory cache of file head bytes.
//!
//! Holds the first [`PREFIX_SIZE`](super::PREFIX_SIZE) bytes of each cached
//! file so the first chunk of a stream is served without touching the disk.
//! Entries are immutable once inserted; the mutex guards the map only, and
//! lookups clone the `Arc` out so bytes are served without holding it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::file_cache::FileCache;

/// Maps absolute path to the file's head bytes.
#[derive(Default)]
pub struct ContentCache {
    entries: Mutex<HashMap<PathBuf, Arc<Vec<u8>>>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Head bytes for `path`, if cached.
    pub fn lookup(&self, path: &Path) -> Option<Arc<Vec<u8>>> {
        self.entries.lock().get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(path)
    }

    /// Insert head bytes for `path`. Only called while the caller holds the
    /// per-path lock for `path`; an existing entry is left untouched.
    pub fn insert(&self, path: &Path, bytes: Vec<u8>) {
        let mut entries = self.entries.lock();
        entries
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(bytes));
    }

    /// Remove the entry for `path`. Returns whether one was present.
    pub fn purge(&self, path: &Path) -> bool {
        self.entries.lock().remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop entries whose path is no longer resident in the file cache, or
    /// whose handle sits unreferenced. Keys are snapshotted first so the
    /// content lock is never held while querying the file cache.
    pub fn sweep(&self, files: &FileCache) {
        let paths: Vec<PathBuf> = self.entries.lock().keys().cloned().collect();
        let mut purged = 0usize;
        for path in paths {
            let in_use = matches!(files.ref_count(&path), Some(rc) if rc > 0);
            if !in_use && self.purge(&path) {
                tracing::debug!(path = %path.display(), "cleared content cache entry");
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!(purged, "content cache sweep complete");
        }
    }
}
