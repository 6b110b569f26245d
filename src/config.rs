//! Server configuration.
//!
//! Loaded from a TOML file; every key has a default, so an empty file (or
//! none at all) yields a runnable local setup.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub grpc: GrpcConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Name reported in logs and the startup banner.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Whether the stock demo accounts are inserted at startup.
    #[serde(default = "default_true")]
    pub seed_accounts: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            seed_accounts: true,
        }
    }
}

/// Plaintext socket listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_socket_addr")]
    pub addr: SocketAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: default_socket_addr(),
        }
    }
}

/// gRPC listener.
#[derive(Debug, Clone, Deserialize)]
pub struct GrpcConfig {
    #[serde(default = "default_grpc_addr")]
    pub addr: SocketAddr,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            addr: default_grpc_addr(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Protocol limits and tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Seconds a socket client gets to present its token line.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Maximum accepted socket line length in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Public messages replayed when a chat stream opens.
    #[serde(default = "default_replay_depth")]
    pub replay_depth: u32,
    /// Default page size for history reads.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

impl LimitsConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            max_line_length: default_max_line_length(),
            replay_depth: default_replay_depth(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_server_name() -> String {
    "natterd".to_string()
}

fn default_true() -> bool {
    true
}

fn default_socket_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 12345))
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 50051))
}

fn default_db_path() -> String {
    "natter.db".to_string()
}

fn default_handshake_timeout() -> u64 {
    15
}

fn default_max_line_length() -> usize {
    512
}

fn default_replay_depth() -> u32 {
    20
}

fn default_history_limit() -> u32 {
    50
}
