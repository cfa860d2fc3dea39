use serde::{Deserialize, Serialize};

/// Service configuration, immutable after startup. Field names follow the
/// deployed YAML schema; unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default, rename = "LogLevel")]
    pub log_level: LogLevel,

    /// 16-byte key for the signature service. Historical name: the token is
    /// HMAC-authenticated, not encrypted.
    #[serde(default, rename = "Encipher")]
    pub encipher: String,

    /// Prefix prepended to the request `path` query parameter.
    #[serde(default, rename = "StorageBasePath")]
    pub storage_base_path: String,

    #[serde(default, rename = "Server")]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    60002
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum LogLevel {
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "DEBUG")]
    Debug,
    #[default]
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "ERROR")]
    Error,
}

impl LogLevel {
    /// The tracing filter directive this level maps to.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Warn => "warn",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}
