//! Reference-counted cache of open file handles.
//!
//! One [`FileEntry`] per cached file: the open handle, the number of
//! in-flight streams borrowing it, and the instant it last went idle. A
//! parallel [`DashMap`] registry holds one mutex per path; that mutex
//! serializes every seek/read/stat on the shared handle for the lifetime of
//! a stream.
//!
//! Lock order: per-path mutex before the global cache mutex whenever both
//! are held. The eviction paths scan under the global mutex alone, then
//! release it, take the victim's per-path mutex, re-take the global mutex,
//! and re-check the victim before closing anything.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::content_cache::ContentCache;
use super::PREFIX_SIZE;

struct FileEntry {
    file: Arc<File>,
    ref_count: usize,
    last_used: Instant,
}

/// Bounded map from path to open file handle, with LRU eviction of idle
/// entries and synchronous head preloading into the content cache.
pub struct FileCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<PathBuf, FileEntry>>,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    content: Arc<ContentCache>,
}

/// A borrowed file handle. Cached leases decrement the entry's refcount on
/// drop; uncached leases close the descriptor when the last `Arc` goes.
pub struct FileLease<'a> {
    cache: &'a FileCache,
    path: PathBuf,
    file: Arc<File>,
    cached: bool,
}

impl FileLease<'_> {
    pub fn file(&self) -> &File {
        &self.file
    }

    /// The shared handle, used as an identity token for purge re-checks.
    pub fn handle(&self) -> &Arc<File> {
        &self.file
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }
}

impl Drop for FileLease<'_> {
    fn drop(&mut self) {
        if self.cached {
            self.cache.release(&self.path, &self.file);
        }
    }
}

impl FileCache {
    /// A cache with the given capacity and idle TTL, sharing `content` with
    /// the stream engine.
    pub fn with_limits(capacity: usize, ttl: Duration, content: Arc<ContentCache>) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(HashMap::new()),
            locks: DashMap::new(),
            content,
        }
    }

    /// The mutex serializing handle operations for `path`. Callers lock it
    /// before `acquire` and hold it until their lease is dropped.
    pub fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Borrow a handle for `path`, opening and caching it on a miss. The
    /// caller must hold the per-path mutex for `path`.
    ///
    /// When the cache is full and no idle entry can make room, the file is
    /// opened uncached and the lease closes it on drop.
    pub fn acquire(&self, path: &Path) -> io::Result<FileLease<'_>> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(path) {
            entry.ref_count += 1;
            let file = Arc::clone(&entry.file);
            tracing::debug!(
                path = %path.display(),
                ref_count = entry.ref_count,
                "reusing cached file handle"
            );
            drop(entries);
            return Ok(self.lease(path, file, true));
        }

        if entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .filter(|(_, entry)| entry.ref_count == 0)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(victim_path, entry)| (victim_path.clone(), Arc::clone(&entry.file)));

            match victim {
                Some((victim_path, victim_file)) => {
                    drop(entries);
                    if self.evict(&victim_path, &victim_file) {
                        return self.open_and_insert(path);
                    }
                    // The candidate was re-acquired or is too fresh to close;
                    // the cache stays bounded and this stream gets its own
                    // uncached handle.
                    tracing::debug!(
                        path = %path.display(),
                        "file cache full, eviction candidate not reclaimable, serving uncached"
                    );
                    let file = File::open(path)?;
                    return Ok(self.lease(path, Arc::new(file), false));
                }
                None => {
                    tracing::debug!(
                        path = %path.display(),
                        cache_size = entries.len(),
                        "file cache full with every entry in use, serving uncached"
                    );
                    drop(entries);
                    let file = File::open(path)?;
                    return Ok(self.lease(path, Arc::new(file), false));
                }
            }
        }

        drop(entries);
        self.open_and_insert(path)
    }

    /// Remove and close a suspect cached entry (stat failed on its handle).
    /// The caller must hold the per-path mutex. No-ops if the entry was
    /// already replaced by a different handle.
    pub fn discard(&self, path: &Path, file: &Arc<File>) {
        let mut entries = self.entries.lock();
        let is_current = entries
            .get(path)
            .is_some_and(|entry| Arc::ptr_eq(&entry.file, file));
        if !is_current {
            return;
        }
        entries.remove(path);
        self.locks.remove(path);
        drop(entries);
        self.content.purge(path);
        tracing::warn!(path = %path.display(), "removed suspect cached file handle");
    }

    /// Close every idle entry older than the TTL.
    pub fn sweep(&self) {
        let candidates: Vec<(PathBuf, Arc<File>)> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(_, entry)| entry.ref_count == 0 && entry.last_used.elapsed() > self.ttl)
                .map(|(path, entry)| (path.clone(), Arc::clone(&entry.file)))
                .collect()
        };
        for (path, file) in candidates {
            self.evict(&path, &file);
        }
    }

    /// Drop every entry and per-path lock. Called on shutdown after the
    /// sweepers have been joined.
    pub fn close_all(&self) {
        let count = {
            let mut entries = self.entries.lock();
            let count = entries.len();
            entries.clear();
            count
        };
        self.locks.clear();
        self.content.clear();
        if count > 0 {
            tracing::info!(closed = count, "closed remaining cached file handles");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Current refcount for `path`, if cached.
    pub fn ref_count(&self, path: &Path) -> Option<usize> {
        self.entries.lock().get(path).map(|entry| entry.ref_count)
    }

    fn lease(&self, path: &Path, file: Arc<File>, cached: bool) -> FileLease<'_> {
        FileLease {
            cache: self,
            path: path.to_path_buf(),
            file,
            cached,
        }
    }

    /// Close and remove one idle entry, re-checking it under the victim's
    /// per-path mutex. Returns whether the entry was actually reclaimed.
    /// The caller must NOT hold the global cache mutex.
    fn evict(&self, path: &Path, file: &Arc<File>) -> bool {
        let Some(lock) = self.locks.get(path).map(|entry| Arc::clone(entry.value())) else {
            // Registry entry vanished out from under the candidate; drop the
            // cache entry outright.
            tracing::warn!(path = %path.display(), "per-path lock missing for eviction candidate");
            return self.entries.lock().remove(path).is_some();
        };
        let _victim_guard = lock.lock();

        let removed = {
            let mut entries = self.entries.lock();
            match entries.get(path) {
                Some(entry)
                    if Arc::ptr_eq(&entry.file, file)
                        && entry.ref_count == 0
                        && entry.last_used.elapsed() > self.ttl =>
                {
                    entries.remove(path);
                    self.locks.remove(path);
                    true
                }
                // Re-acquired, replaced, or freshly released: leave it.
                _ => false,
            }
        };
        if removed {
            self.content.purge(path);
            tracing::info!(path = %path.display(), "evicted idle cached file handle");
        }
        removed
    }

    /// Open `path`, preload its head, and insert it with refcount 1. The
    /// caller must hold the per-path mutex for `path`.
    fn open_and_insert(&self, path: &Path) -> io::Result<FileLease<'_>> {
        let file = File::open(path)?;
        // Preloading before insertion is safe: the per-path mutex is held,
        // so no stream can be reading this handle yet, and the positional
        // read leaves the handle offset untouched either way.
        self.preload(path, &file);
        let file = Arc::new(file);

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(path) {
            // Lost an insert race; use the existing handle and let ours
            // close on drop.
            entry.ref_count += 1;
            let existing = Arc::clone(&entry.file);
            tracing::debug!(
                path = %path.display(),
                ref_count = entry.ref_count,
                "insert race, reusing existing cached handle"
            );
            drop(entries);
            return Ok(self.lease(path, existing, true));
        }

        entries.insert(
            path.to_path_buf(),
            FileEntry {
                file: Arc::clone(&file),
                ref_count: 1,
                last_used: Instant::now(),
            },
        );
        drop(entries);
        tracing::debug!(path = %path.display(), "opened and cached file handle");
        Ok(self.lease(path, file, true))
    }

    fn preload(&self, path: &Path, file: &File) {
        if self.content.contains(path) {
            return;
        }
        match read_prefix(file, PREFIX_SIZE) {
            Ok(bytes) => {
                tracing::debug!(
                    path = %path.display(),
                    bytes = bytes.len(),
                    "preloaded file head into content cache"
                );
                self.content.insert(path, bytes);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to preload file head");
            }
        }
    }

    fn release(&self, path: &Path, file: &Arc<File>) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(path) else {
            return;
        };
        if !Arc::ptr_eq(&entry.file, file) {
            return;
        }
        if entry.ref_count == 0 {
            tracing::warn!(
                path = %path.display(),
                "refcount underflow on release, likely a bug; clamping to 0"
            );
            return;
        }
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            entry.last_used = Instant::now();
        }
    }
}

/// Read up to `len` head bytes via positional reads that leave the handle's
/// current offset untouched.
fn read_prefix(file: &File, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0usize;
    while filled < len {
        match read_at(file, &mut buf[filled..], filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cache(capacity: usize, ttl: Duration) -> (FileCache, Arc<ContentCache>) {
        let content = Arc::new(ContentCache::new());
        (
            FileCache::with_limits(capacity, ttl, Arc::clone(&content)),
            content,
        )
    }

    fn write_files(dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("file_{i}.mp4"));
                std::fs::write(&path, format!("contents of file {i}")).unwrap();
                path
            })
            .collect()
    }

    fn acquire_and_drop(cache: &FileCache, path: &Path) {
        let lock = cache.path_lock(path);
        let _guard = lock.lock();
        let lease = cache.acquire(path).unwrap();
        assert!(lease.is_cached());
        drop(lease);
    }

    #[test]
    fn test_miss_opens_caches_and_preloads() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), 1);
        let (cache, content) = test_cache(4, FILE_TTL_FOR_TESTS);

        acquire_and_drop(&cache, &paths[0]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.ref_count(&paths[0]), Some(0));
        assert_eq!(
            content.lookup(&paths[0]).unwrap().as_slice(),
            b"contents of file 0"
        );
    }

    #[test]
    fn test_hit_increments_refcount() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), 1);
        let (cache, _) = test_cache(4, FILE_TTL_FOR_TESTS);

        let lock = cache.path_lock(&paths[0]);
        let guard = lock.lock();
        let first = cache.acquire(&paths[0]).unwrap();
        drop(guard);
        assert_eq!(cache.ref_count(&paths[0]), Some(1));

        let guard = lock.lock();
        let second = cache.acquire(&paths[0]).unwrap();
        drop(guard);
        assert_eq!(cache.ref_count(&paths[0]), Some(2));
        assert!(Arc::ptr_eq(first.handle(), second.handle()));

        drop(second);
        assert_eq!(cache.ref_count(&paths[0]), Some(1));
        drop(first);
        assert_eq!(cache.ref_count(&paths[0]), Some(0));
    }

    #[test]
    fn test_open_error_surfaces() {
        let (cache, _) = test_cache(4, FILE_TTL_FOR_TESTS);
        let missing = Path::new("/definitely/not/here.mp4");
        let lock = cache.path_lock(missing);
        let _guard = lock.lock();
        assert!(cache.acquire(missing).is_err());
    }

    #[test]
    fn test_capacity_evicts_oldest_idle_entry() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), 3);
        // Zero TTL: every idle entry is immediately evictable.
        let (cache, content) = test_cache(2, Duration::ZERO);

        acquire_and_drop(&cache, &paths[0]);
        std::thread::sleep(Duration::from_millis(5));
        acquire_and_drop(&cache, &paths[1]);
        std::thread::sleep(Duration::from_millis(5));
        acquire_and_drop(&cache, &paths[2]);

        assert_eq!(cache.len(), 2);
        assert!(cache.ref_count(&paths[0]).is_none());
        assert!(content.lookup(&paths[0]).is_none());
        assert!(cache.ref_count(&paths[1]).is_some());
        assert!(cache.ref_count(&paths[2]).is_some());
    }

    #[test]
    fn test_fresh_idle_entry_is_not_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), 2);
        // Long TTL: the idle entry is too fresh to evict, so the second
        // file is served uncached and the cache stays bounded.
        let (cache, _) = test_cache(1, FILE_TTL_FOR_TESTS);

        acquire_and_drop(&cache, &paths[0]);

        let lock = cache.path_lock(&paths[1]);
        let _guard = lock.lock();
        let lease = cache.acquire(&paths[1]).unwrap();
        assert!(!lease.is_cached());
        drop(lease);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.ref_count(&paths[0]), Some(0));
        assert!(cache.ref_count(&paths[1]).is_none());
    }

    #[test]
    fn test_full_cache_with_all_entries_referenced_serves_uncached() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), 3);
        let (cache, _) = test_cache(2, Duration::ZERO);

        let lock_a = cache.path_lock(&paths[0]);
        let guard_a = lock_a.lock();
        let held_a = cache.acquire(&paths[0]).unwrap();
        drop(guard_a);
        let lock_b = cache.path_lock(&paths[1]);
        let guard_b = lock_b.lock();
        let held_b = cache.acquire(&paths[1]).unwrap();
        drop(guard_b);

        let lock_c = cache.path_lock(&paths[2]);
        let guard_c = lock_c.lock();
        let uncached = cache.acquire(&paths[2]).unwrap();
        drop(guard_c);

        assert!(!uncached.is_cached());
        assert_eq!(cache.len(), 2);
        assert!(cache.ref_count(&paths[2]).is_none());

        drop(uncached);
        drop(held_a);
        drop(held_b);
    }

    #[test]
    fn test_eviction_bound_over_many_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), 7);
        let (cache, _) = test_cache(4, Duration::ZERO);

        for path in &paths {
            acquire_and_drop(&cache, path);
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_sweep_closes_idle_entries() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), 2);
        let (cache, content) = test_cache(4, Duration::ZERO);

        acquire_and_drop(&cache, &paths[0]);

        let lock = cache.path_lock(&paths[1]);
        let guard = lock.lock();
        let held = cache.acquire(&paths[1]).unwrap();
        drop(guard);

        cache.sweep();

        assert_eq!(cache.len(), 1);
        assert!(cache.ref_count(&paths[0]).is_none());
        assert!(content.lookup(&paths[0]).is_none());
        assert_eq!(cache.ref_count(&paths[1]), Some(1));

        drop(held);
    }

    #[test]
    fn test_discard_removes_matching_entry_only() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), 1);
        let (cache, content) = test_cache(4, FILE_TTL_FOR_TESTS);

        let lock = cache.path_lock(&paths[0]);
        let guard = lock.lock();
        let lease = cache.acquire(&paths[0]).unwrap();

        // A handle that is not the cached one must not disturb the entry.
        let stranger = Arc::new(File::open(&paths[0]).unwrap());
        cache.discard(&paths[0], &stranger);
        assert_eq!(cache.len(), 1);

        cache.discard(&paths[0], lease.handle());
        assert_eq!(cache.len(), 0);
        assert!(content.lookup(&paths[0]).is_none());

        drop(lease);
        drop(guard);
    }

    #[test]
    fn test_close_all_drains_everything() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_files(dir.path(), 3);
        let (cache, content) = test_cache(4, FILE_TTL_FOR_TESTS);

        for path in &paths {
            acquire_and_drop(&cache, path);
        }
        cache.close_all();
        assert!(cache.is_empty());
        assert!(content.is_empty());
    }

    const FILE_TTL_FOR_TESTS: Duration = Duration::from_secs(600);
}
