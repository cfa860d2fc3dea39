mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.encipher.is_empty() {
        anyhow::bail!("Encipher key is required");
    }

    if !config.storage_base_path.is_empty() && !Path::new(&config.storage_base_path).exists() {
        tracing::warn!(
            "Storage base path does not exist: {:?}",
            config.storage_base_path
        );
    }

    Ok(())
}
