//! Media streaming engine.
//!
//! Serves byte ranges of local media files through a concurrent,
//! reference-counted file-handle cache:
//!
//! - [`BufferPool`] recycles fixed-size copy buffers.
//! - [`ContentCache`] holds the head bytes of each cached file for fast
//!   first-byte latency.
//! - [`FileCache`] maps paths to open handles with refcounts, LRU eviction,
//!   and a per-path lock registry that serializes all handle operations.
//! - [`Streamer`] orchestrates range resolution, cache-first serving, and
//!   the chunked read/write loop behind an HTTP response body.
//!
//! Two background sweepers (see [`start_sweepers`]) close idle handles and
//! drop stale head-content entries.

mod buffer_pool;
mod content_cache;
mod engine;
pub mod error;
mod file_cache;
mod range;
mod sweeper;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use content_cache::ContentCache;
pub use engine::{ResponseHead, StreamResponse, Streamer};
pub use error::StreamError;
pub use file_cache::{FileCache, FileLease};
pub use range::ByteRange;
pub use sweeper::{start_sweepers, start_sweepers_with, SweeperSet};

use std::time::Duration;

/// Bytes of each file's head kept in the content cache.
pub const PREFIX_SIZE: usize = 2 * 1024 * 1024;

/// Size of a pooled copy buffer.
pub const BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Smaller buffer used for streams starting at offset 0, favoring
/// first-byte latency over throughput.
pub const SMALL_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Number of buffers pre-allocated at startup.
pub const BUFFER_POOL_WARM: usize = 200;

/// Cumulative bytes written between response flushes.
pub const FLUSH_QUANTUM: usize = 256 * 1024;

/// Maximum number of cached open file handles.
pub const MAX_CACHED_FILES: usize = 200;

/// How long an unreferenced handle may stay cached before it is evictable.
pub const FILE_TTL: Duration = Duration::from_secs(10 * 60);

/// Interval between file-handle sweeper runs.
pub const FILE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Interval between content-cache sweeper runs.
pub const CONTENT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
