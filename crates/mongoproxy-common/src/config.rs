//! Configuration management for mongoproxy

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Standard port of the upstream database server
pub const DEFAULT_UPSTREAM_PORT: u16 = 27017;

/// Largest message the upstream database accepts
pub const DEFAULT_MAX_MESSAGE_BYTES: u32 = 48_000_000;

/// Size of the fixed message header every frame starts with
pub const MESSAGE_HEADER_LEN: u32 = 16;

/// Main configuration structure for mongoproxy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listening side
    #[serde(default)]
    pub server: ServerConfig,

    /// Real database server
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Per-connection relay limits
    #[serde(default)]
    pub relay: RelayConfig,

    /// Collections the binary attaches a logging listener to
    #[serde(default)]
    pub watch: Vec<WatchConfig>,
}

impl Config {
    /// Load configuration from a TOML or JSON file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = if path.as_ref().extension().map_or(false, |ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, defaults otherwise
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.upstream.host.trim().is_empty() {
            return Err(Error::Config("upstream.host must not be empty".to_string()));
        }
        if self.upstream.port == 0 {
            return Err(Error::Config("upstream.port must not be 0".to_string()));
        }
        if self.relay.max_message_bytes < MESSAGE_HEADER_LEN {
            return Err(Error::Config(format!(
                "relay.max_message_bytes must be at least {}",
                MESSAGE_HEADER_LEN
            )));
        }
        for watch in &self.watch {
            if watch.database.is_empty() || watch.collection.is_empty() {
                return Err(Error::Config(
                    "watch entries need both database and collection".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: String,
    /// Listening port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 27018,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Database server host
    pub host: String,
    /// Database server port
    pub port: u16,
    /// Timeout for opening the upstream socket
    pub connect_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_UPSTREAM_PORT,
            connect_timeout_ms: 5000,
        }
    }
}

impl UpstreamConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Frames declaring a larger length are rejected
    pub max_message_bytes: u32,
    /// How long a client may stay silent between requests (none = forever)
    pub client_idle_timeout_ms: Option<u64>,
    /// How long the upstream may take to answer a request (none = forever)
    pub upstream_response_timeout_ms: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            client_idle_timeout_ms: None,
            upstream_response_timeout_ms: None,
        }
    }
}

impl RelayConfig {
    pub fn client_idle_timeout(&self) -> Option<Duration> {
        self.client_idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn upstream_response_timeout(&self) -> Option<Duration> {
        self.upstream_response_timeout_ms.map(Duration::from_millis)
    }
}

/// A `database.collection` pair to watch for inserts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    pub database: String,
    pub collection: String,
}

impl WatchConfig {
    /// Parse `database.collection`; the collection part may itself contain dots.
    pub fn parse(spec: &str) -> Result<Self> {
        match spec.split_once('.') {
            Some((database, collection)) if !database.is_empty() && !collection.is_empty() => {
                Ok(Self {
                    database: database.to_string(),
                    collection: collection.to_string(),
                })
            }
            _ => Err(Error::Config(format!(
                "expected DATABASE.COLLECTION, got '{}'",
                spec
            ))),
        }
    }
}
