//! Error types for the streaming engine.

/// Errors surfaced by [`super::Streamer`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The file could not be opened.
    #[error("file not found: {0}")]
    NotFound(#[source] std::io::Error),

    /// The requested range starts beyond the end of the file. The handler
    /// responds `416` with `Content-Range: bytes */<size>`.
    #[error("requested range not satisfiable for file of {size} bytes")]
    RangeUnsatisfiable { size: u64 },

    /// Path resolution, stat, seek, or read failed.
    #[error("internal stream error: {0}")]
    Internal(String),

    /// The client went away mid-stream. Logged, never surfaced as a status.
    #[error("client disconnected")]
    ClientGone,
}
