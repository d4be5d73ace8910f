//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! an address override (`CHORUS_ADDR`), then command-line flags. The
//! binary applies the last two; this module provides the pieces.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 9000
//! max_connections = 512
//! idle_timeout_secs = 600
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use chorus_core::DEFAULT_MAX_MESSAGE_SIZE;

use crate::registry::MAX_CONNECTIONS;

/// Default listening host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listening port
pub const DEFAULT_PORT: u16 = 8765;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "CHORUS_CONFIG";

/// Environment variable overriding the listen address (`host:port`)
pub const ADDR_ENV: &str = "CHORUS_ADDR";

/// Default per-connection outbound queue depth
const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default WebSocket handshake timeout in seconds
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Runtime settings for `chorusd`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to listen on.
    pub host: String,

    /// TCP port to listen on (0 picks a free port).
    pub port: u16,

    /// Maximum simultaneously registered connections.
    pub max_connections: usize,

    /// Messages queued per connection before further sends are dropped.
    pub outbound_buffer: usize,

    /// Largest accepted inbound text message, in bytes.
    pub max_message_size: usize,

    /// Close connections that stay silent this long. `None` disables.
    pub idle_timeout_secs: Option<u64>,

    /// Time allowed for the WebSocket upgrade after TCP accept.
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_connections: MAX_CONNECTIONS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            idle_timeout_secs: None,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Parses a config from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Replaces host and port from a `host:port` string.
    pub fn apply_addr_override(&mut self, addr: &str) -> Result<(), ConfigError> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidAddress(addr.to_string()))?;
        let port = port
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(addr.to_string()))?;
        if host.is_empty() {
            return Err(ConfigError::InvalidAddress(addr.to_string()));
        }

        self.host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        self.port = port;
        Ok(())
    }

    /// Checks values that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                reason: "must not be empty",
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "max_connections",
                reason: "must be at least 1",
            });
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "outbound_buffer",
                reason: "must be at least 1",
            });
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_size",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Address string suitable for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        match self.host.parse::<std::net::IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid listen address: {0} (expected host:port)")]
    InvalidAddress(String),

    #[error("Invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
