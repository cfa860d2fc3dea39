//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates a temp storage directory, a
//! signature service, and a stream engine with test-sized limits. The
//! [`with_server`] constructor starts Axum on a random port for HTTP-level
//! testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mediagate::auth::{SignaturePayload, SignatureService};
use mediagate::config::Config;
use mediagate::server::{create_router, AppContext};
use mediagate::streaming::Streamer;

/// The 16-byte key every test signs with.
pub const ENCIPHER: &str = "0123456789abcdef";

/// Test harness wrapping the storage directory, the signer, and the stream
/// engine behind a real HTTP server.
pub struct TestHarness {
    pub storage: tempfile::TempDir,
    pub signer: Arc<SignatureService>,
    pub streamer: Arc<Streamer>,
}

impl TestHarness {
    /// Create a new harness with roomy cache limits.
    pub fn new() -> Self {
        Self::with_cache_limits(64, Duration::from_secs(600))
    }

    /// Create a harness with explicit file-cache capacity and idle TTL.
    pub fn with_cache_limits(max_files: usize, ttl: Duration) -> Self {
        let storage = tempfile::tempdir().expect("failed to create temp storage dir");
        let signer = Arc::new(SignatureService::new(ENCIPHER).expect("valid test key"));
        let streamer = Arc::new(Streamer::with_limits(max_files, ttl, 4));
        Self {
            storage,
            signer,
            streamer,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::new().serve().await
    }

    /// Start a server with explicit cache limits.
    pub async fn with_server_limits(max_files: usize, ttl: Duration) -> (Self, SocketAddr) {
        Self::with_cache_limits(max_files, ttl).serve().await
    }

    async fn serve(self) -> (Self, SocketAddr) {
        let config = Config {
            encipher: ENCIPHER.to_string(),
            storage_base_path: self.storage.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        let ctx = AppContext {
            config: Arc::new(config),
            signer: Arc::clone(&self.signer),
            streamer: Arc::clone(&self.streamer),
        };
        let app = create_router(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (self, addr)
    }

    /// Write a fixture file into the storage directory.
    pub fn write_media(&self, name: &str, data: &[u8]) {
        std::fs::write(self.storage.path().join(name), data).expect("failed to write fixture");
    }

    /// A token that expires an hour from now.
    pub fn token(&self) -> String {
        self.token_expiring_in(3600)
    }

    /// A token expiring `secs_from_now` seconds from now (negative for an
    /// already-expired token).
    pub fn token_expiring_in(&self, secs_from_now: i64) -> String {
        self.signer.encrypt(&SignaturePayload {
            item_id: "item-1".to_string(),
            media_id: "media-1".to_string(),
            expire_at: now_epoch() + secs_from_now,
        })
    }

    /// A token with caller-chosen ids.
    pub fn token_for(&self, item_id: &str, media_id: &str) -> String {
        self.signer.encrypt(&SignaturePayload {
            item_id: item_id.to_string(),
            media_id: media_id.to_string(),
            expire_at: now_epoch() + 3600,
        })
    }
}

pub fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as i64
}

/// Position-dependent test bytes so range assertions catch offset bugs.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Build the stream URL for a media file name.
pub fn stream_url(addr: SocketAddr) -> String {
    format!("http://{addr}/stream")
}
