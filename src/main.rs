mod cli;

use mediagate::{
    auth::SignatureService,
    config::{self, Config},
    server,
    streaming::{self, Streamer},
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(&cli.config)?;

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise derive from the configured level
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        let level = config.log_level.as_filter();
        format!("mediagate={level},tower_http={level}")
    });
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        config_file = %cli.config.display(),
        port = config.server.port,
        "Configuration loaded successfully"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let signer = Arc::new(
        SignatureService::new(&config.encipher)
            .context("Failed to initialize signature service")?,
    );
    tracing::info!("Signature service initialized");

    let streamer = Arc::new(Streamer::new());
    let sweepers = streaming::start_sweepers(Arc::clone(&streamer));

    let result = server::start_server(config, signer, Arc::clone(&streamer)).await;

    // Cleanup
    tracing::info!("Shutting down...");
    sweepers.shutdown().await;
    streamer.close_all();

    result
}
