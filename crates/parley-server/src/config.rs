//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PARLEY_HOST, PARLEY_PORT)
//! - TOML configuration file
//! - A config path given as the first command line argument

use anyhow::{bail, Context, Result};
use parley_core::{ClientConfig, RoomConfig, DEFAULT_ROOM_NAME};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Room defaults.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Room defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Room created at startup; unknown room names fall back to it.
    #[serde(default = "default_room")]
    pub default_room: String,

    /// Display name used when a client gives none.
    #[serde(default = "default_display_name")]
    pub default_display_name: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound messages queued per client before it is dropped.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Pending broadcasts buffered per room.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// How long a client may go without a pong, in milliseconds.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Deadline for a single write, in milliseconds.
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PARLEY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("PARLEY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_room() -> String {
    DEFAULT_ROOM_NAME.to_string()
}

fn default_display_name() -> String {
    "hello world".to_string()
}

fn default_max_message_size() -> usize {
    512
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_broadcast_capacity() -> usize {
    5
}

fn default_pong_wait() -> u64 {
    60_000 // 60 seconds
}

fn default_write_wait() -> u64 {
    10_000 // 10 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            rooms: RoomsConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            default_room: default_room(),
            default_display_name: default_display_name(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            mailbox_capacity: default_mailbox_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            pong_wait_ms: default_pong_wait(),
            write_wait_ms: default_write_wait(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds
    /// invalid values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check values the hub cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error if a heartbeat interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.pong_wait_ms == 0 {
            bail!("heartbeat.pong_wait_ms must be greater than zero");
        }
        if self.heartbeat.write_wait_ms == 0 {
            bail!("heartbeat.write_wait_ms must be greater than zero");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Per-client settings for the hub.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            mailbox_capacity: self.limits.mailbox_capacity,
            max_message_size: self.limits.max_message_size,
            pong_wait: Duration::from_millis(self.heartbeat.pong_wait_ms),
            write_wait: Duration::from_millis(self.heartbeat.write_wait_ms),
        }
    }

    /// Per-room settings for the hub.
    #[must_use]
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            broadcast_capacity: self.limits.broadcast_capacity,
        }
    }
}
