//! Periodic cache maintenance tasks.
//!
//! Two detached workers: one closes idle file handles past their TTL, one
//! drops content-cache entries with no live file-cache backing. Both stop on
//! a shutdown signal and are joined before the remaining handles are closed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::engine::Streamer;
use super::{CONTENT_SWEEP_INTERVAL, FILE_SWEEP_INTERVAL};

#[derive(Clone, Copy, Debug)]
enum SweepKind {
    Files,
    Content,
}

/// Handles to the running sweepers.
pub struct SweeperSet {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SweeperSet {
    /// Signal both sweepers and wait for them to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Start the file-handle and content-cache sweepers at production intervals.
pub fn start_sweepers(streamer: Arc<Streamer>) -> SweeperSet {
    start_sweepers_with(streamer, FILE_SWEEP_INTERVAL, CONTENT_SWEEP_INTERVAL)
}

/// Start the sweepers with explicit intervals.
pub fn start_sweepers_with(
    streamer: Arc<Streamer>,
    file_interval: Duration,
    content_interval: Duration,
) -> SweeperSet {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = vec![
        tokio::spawn(run_sweeper(
            Arc::clone(&streamer),
            SweepKind::Files,
            file_interval,
            shutdown_rx.clone(),
        )),
        tokio::spawn(run_sweeper(
            streamer,
            SweepKind::Content,
            content_interval,
            shutdown_rx,
        )),
    ];
    SweeperSet {
        shutdown_tx,
        handles,
    }
}

async fn run_sweeper(
    streamer: Arc<Streamer>,
    kind: SweepKind,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so sweeps start one full
    // interval after startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let streamer = Arc::clone(&streamer);
                // Sweeping takes per-path locks that in-flight streams may
                // hold for a while, so it runs on the blocking pool.
                let result = tokio::task::spawn_blocking(move || match kind {
                    SweepKind::Files => streamer.sweep_files(),
                    SweepKind::Content => streamer.sweep_content(),
                })
                .await;
                if let Err(e) = result {
                    tracing::error!(?kind, error = %e, "cache sweep task failed");
                }
            }
            _ = shutdown.changed() => {
                tracing::debug!(?kind, "sweeper stopping");
                return;
            }
        }
    }
}
