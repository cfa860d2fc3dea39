//! Stream orchestration.
//!
//! [`Streamer::stream`] bridges the blocking engine to an axum response: a
//! worker on the blocking pool resolves the path, takes the per-path lock
//! for the whole stream, acquires a cached handle, and feeds body frames
//! into a bounded channel that backs the response body. The response head
//! (status and headers) travels over a oneshot so error statuses can still
//! be emitted before the first byte.

use axum::body::Body;
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use super::buffer_pool::BufferPool;
use super::content_cache::ContentCache;
use super::error::StreamError;
use super::file_cache::{FileCache, FileLease};
use super::range;
use super::{
    BUFFER_POOL_WARM, BUFFER_SIZE, FILE_TTL, FLUSH_QUANTUM, MAX_CACHED_FILES, SMALL_BUFFER_SIZE,
};

/// Frames buffered between the blocking reader and the socket writer.
const BODY_CHANNEL_DEPTH: usize = 8;

/// Status and headers for a stream response, decided before the first byte.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub content_length: u64,
    pub content_range: Option<String>,
}

/// A started stream: the head plus the body being fed by the engine.
pub struct StreamResponse {
    pub head: ResponseHead,
    pub body: Body,
}

/// The streaming engine. Owns the file-handle cache, the content cache, and
/// the buffer pool; one instance serves every request.
pub struct Streamer {
    files: FileCache,
    content: Arc<ContentCache>,
    buffers: BufferPool,
}

impl Default for Streamer {
    fn default() -> Self {
        Self::new()
    }
}

impl Streamer {
    /// An engine with production limits.
    pub fn new() -> Self {
        Self::with_limits(MAX_CACHED_FILES, FILE_TTL, BUFFER_POOL_WARM)
    }

    /// An engine with explicit cache capacity, idle TTL, and buffer pool
    /// warm count.
    pub fn with_limits(max_files: usize, ttl: Duration, warm_buffers: usize) -> Self {
        let content = Arc::new(ContentCache::new());
        Self {
            files: FileCache::with_limits(max_files, ttl, Arc::clone(&content)),
            content,
            buffers: BufferPool::new(warm_buffers, BUFFER_SIZE),
        }
    }

    pub fn file_cache(&self) -> &FileCache {
        &self.files
    }

    pub fn content_cache(&self) -> &ContentCache {
        &self.content
    }

    /// Close idle cached handles past their TTL.
    pub fn sweep_files(&self) {
        self.files.sweep();
    }

    /// Drop content-cache entries with no live file-cache backing.
    pub fn sweep_content(&self) {
        self.content.sweep(&self.files);
    }

    /// Close every cached handle. Called on shutdown, after sweepers stop.
    pub fn close_all(&self) {
        self.files.close_all();
    }

    /// Stream `path`, honoring `range_header`. Returns the response head and
    /// a body that the engine keeps feeding from the blocking pool; errors
    /// that occur before the first byte come back as [`StreamError`].
    pub async fn stream(
        self: Arc<Self>,
        path: PathBuf,
        range_header: Option<String>,
    ) -> Result<StreamResponse, StreamError> {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_DEPTH);

        tokio::task::spawn_blocking(move || self.run_blocking(path, range_header, head_tx, body_tx));

        let head = head_rx.await.map_err(|_| {
            StreamError::Internal("stream worker exited before producing a response".into())
        })??;
        Ok(StreamResponse {
            head,
            body: Body::from_stream(ReceiverStream::new(body_rx)),
        })
    }

    /// The blocking half of a stream. Holds the per-path mutex from before
    /// handle acquisition until the last byte, serializing every operation
    /// on the shared handle.
    fn run_blocking(
        &self,
        path: PathBuf,
        range_header: Option<String>,
        head_tx: oneshot::Sender<Result<ResponseHead, StreamError>>,
        body_tx: mpsc::Sender<Result<Bytes, io::Error>>,
    ) {
        tracing::info!(path = %path.display(), "starting file stream");

        let abs = match std::path::absolute(&path) {
            Ok(abs) => abs,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to resolve absolute path");
                let _ = head_tx.send(Err(StreamError::Internal(format!(
                    "failed to resolve absolute path: {e}"
                ))));
                return;
            }
        };

        let path_lock = self.files.path_lock(&abs);
        let _path_guard = path_lock.lock();

        let lease = match self.files.acquire(&abs) {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!(path = %abs.display(), error = %e, "failed to open file");
                let _ = head_tx.send(Err(StreamError::NotFound(e)));
                return;
            }
        };

        let metadata = match lease.file().metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::error!(path = %abs.display(), error = %e, "failed to stat file");
                if lease.is_cached() {
                    // The handle is suspect; drop it from both caches.
                    self.files.discard(&abs, lease.handle());
                }
                let _ = head_tx.send(Err(StreamError::Internal(format!(
                    "failed to stat file: {e}"
                ))));
                return;
            }
        };
        let file_size = metadata.len();

        let had_range_header = range_header.as_deref().is_some_and(|h| !h.is_empty());
        let window = range::parse(range_header.as_deref(), file_size);
        let (start, end) = (window.start, window.end);

        if start >= file_size || end < start {
            tracing::warn!(
                path = %abs.display(),
                start,
                end,
                file_size,
                "requested range is not satisfiable"
            );
            let _ = head_tx.send(Err(StreamError::RangeUnsatisfiable { size: file_size }));
            return;
        }

        // A request that carried a Range header gets 206 even when the
        // window covers the whole file; players expect the Content-Range
        // echo on ranged requests.
        let partial = had_range_header || start != 0 || end != file_size - 1;
        let head = ResponseHead {
            status: if partial {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            },
            content_type: content_type_for_path(&abs),
            content_length: end - start + 1,
            content_range: partial.then(|| format!("bytes {start}-{end}/{file_size}")),
        };
        if head_tx.send(Ok(head)).is_err() {
            // Request dropped before headers went out.
            return;
        }
        tracing::info!(
            path = %abs.display(),
            start,
            end,
            file_size,
            partial,
            "streaming file range"
        );

        match self.copy_range(&abs, &lease, start, end, body_tx) {
            Ok(written) => {
                tracing::debug!(path = %abs.display(), written, "file streaming completed");
            }
            Err(StreamError::ClientGone) => {
                tracing::error!(path = %abs.display(), "client connection lost mid-stream");
            }
            Err(e) => {
                tracing::error!(path = %abs.display(), error = %e, "file streaming aborted");
            }
        }
    }

    /// Copy `file[start..=end]` to the body channel, serving the leading
    /// bytes from the content cache when possible. Returns bytes written.
    fn copy_range(
        &self,
        path: &Path,
        lease: &FileLease<'_>,
        start: u64,
        end: u64,
        body_tx: mpsc::Sender<Result<Bytes, io::Error>>,
    ) -> Result<u64, StreamError> {
        let buffer_size = if start == 0 {
            SMALL_BUFFER_SIZE
        } else {
            BUFFER_SIZE
        };
        let mut buffer = self.buffers.acquire(buffer_size);
        let mut writer = BodyWriter::new(body_tx);

        let mut offset = start;
        let mut remaining = end - start + 1;
        let mut written = 0u64;

        if let Some(cached) = self.content.lookup(path) {
            if offset < cached.len() as u64 {
                let cache_end = end.min(cached.len() as u64 - 1);
                let chunk = &cached[offset as usize..=cache_end as usize];
                writer.write(chunk)?;
                writer.flush()?;
                written += chunk.len() as u64;
                remaining -= chunk.len() as u64;
                offset += chunk.len() as u64;
                tracing::debug!(
                    served = chunk.len(),
                    remaining,
                    "served leading bytes from content cache"
                );
                if remaining == 0 {
                    return Ok(written);
                }
            }
        }

        let mut file: &File = lease.file();

        // The handle is shared: its offset is wherever the previous stream
        // left it, so seek whenever it disagrees with ours.
        let position = match file.stream_position() {
            Ok(position) => position,
            Err(e) => return Err(writer.fail(e, "failed to query file offset")),
        };
        if position != offset {
            if let Err(e) = file.seek(SeekFrom::Start(offset)) {
                return Err(writer.fail(e, "failed to seek file"));
            }
        }

        while remaining > 0 {
            let read_size = remaining.min(buffer.len() as u64) as usize;
            let n = match file.read(&mut buffer[..read_size]) {
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(writer.fail(e, "failed to read file")),
            };
            if n == 0 {
                break;
            }
            writer.write(&buffer[..n])?;
            written += n as u64;
            remaining -= n as u64;
            offset += n as u64;
        }

        writer.flush()?;
        Ok(written)
    }
}

/// Accumulates written bytes and emits one body frame per flush quantum, so
/// the client sees data at a steady cadence regardless of read chunk size.
struct BodyWriter {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    staged: BytesMut,
}

impl BodyWriter {
    fn new(tx: mpsc::Sender<Result<Bytes, io::Error>>) -> Self {
        Self {
            tx,
            staged: BytesMut::new(),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        self.staged.extend_from_slice(data);
        while self.staged.len() >= FLUSH_QUANTUM {
            let frame = self.staged.split_to(FLUSH_QUANTUM).freeze();
            self.send(frame)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let frame = self.staged.split().freeze();
        self.send(frame)
    }

    fn send(&self, frame: Bytes) -> Result<(), StreamError> {
        self.tx
            .blocking_send(Ok(frame))
            .map_err(|_| StreamError::ClientGone)
    }

    /// Abort the body with an I/O error and produce the matching engine
    /// error. The head is already on the wire by the time this can happen,
    /// so severing the body stream is all that is left.
    fn fail(&self, error: io::Error, what: &str) -> StreamError {
        let message = format!("{what}: {error}");
        let _ = self
            .tx
            .blocking_send(Err(io::Error::new(error.kind(), message.clone())));
        StreamError::Internal(message)
    }
}

fn content_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("flv") => "video/x-flv",
        Some("rmvb") => "application/vnd.rn-realmedia-vbr",
        Some("rm") => "application/vnd.rn-realmedia",
        Some("mka") => "audio/x-matroska",
        Some("aac") => "audio/aac",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("srt") => "application/x-subrip",
        Some("vtt") => "text/vtt",
        Some("ass") => "text/x-ssa",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
