//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - built-in defaults
//! - a TOML configuration file (`--config`, or the first of the search paths)
//! - environment variables (`HUDDLE_PORT`, `HUDDLE_ROOM__ECHO_TO_SENDER`, ...)

use anyhow::{bail, Context, Result};
use huddle_core::{
    AuthAvatar, AvatarChain, FileSystemAvatar, GravatarAvatar, HubConfig, PumpConfig,
    SlowMemberPolicy,
};
use huddle_protocol::WireFormat;
use huddle_transport::websocket::WebSocketConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Files searched when no path is given, in order.
pub const SEARCH_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

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

    /// Room (hub) configuration.
    #[serde(default)]
    pub room: RoomConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Session cookie configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Avatar resolution.
    #[serde(default)]
    pub avatars: AvatarsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the room's WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Encoding of outbound frames.
    #[serde(default)]
    pub wire_format: WireFormat,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Room configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Capacity of each member's outbound queue.
    #[serde(default = "default_queue_capacity")]
    pub member_queue_capacity: usize,

    /// Capacity of the hub's request queue.
    #[serde(default = "default_queue_capacity")]
    pub request_queue_capacity: usize,

    /// Deliver a member's messages back to it.
    #[serde(default = "default_true")]
    pub echo_to_sender: bool,

    /// What to do with a member whose queue is full.
    #[serde(default)]
    pub slow_member: SlowMember,

    /// How long `evict` waits before removing a slow member.
    #[serde(default = "default_evict_after")]
    pub evict_after_ms: u64,
}

/// Slow member handling, as named in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlowMember {
    /// Wait for room in the queue.
    #[default]
    Block,
    /// Wait up to `evict_after_ms`, then remove the member.
    Evict,
    /// Skip the message for that member.
    Drop,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Drop connections silent for this long, in milliseconds. 0 disables.
    #[serde(default)]
    pub timeout_ms: u64,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Name of the cookie holding the session.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

/// Avatar resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarsConfig {
    /// Resolvers in priority order: `auth`, `file_system`, `gravatar`.
    #[serde(default = "default_avatar_chain")]
    pub chain: Vec<String>,

    /// Directory holding uploaded pictures.
    #[serde(default = "default_avatar_dir")]
    pub directory: PathBuf,

    /// URL prefix under which uploaded pictures are served.
    #[serde(default = "default_avatar_prefix")]
    pub url_prefix: String,

    /// Gravatar endpoint.
    #[serde(default = "default_gravatar_base")]
    pub gravatar_base: String,
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
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/room".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_queue_capacity() -> usize {
    256
}

fn default_evict_after() -> u64 {
    1_000
}

fn default_cookie_name() -> String {
    "auth".to_string()
}

fn default_avatar_chain() -> Vec<String> {
    vec!["auth".into(), "file_system".into(), "gravatar".into()]
}

fn default_avatar_dir() -> PathBuf {
    PathBuf::from("avatars")
}

fn default_avatar_prefix() -> String {
    "/avatars/".to_string()
}

fn default_gravatar_base() -> String {
    huddle_core::avatar::GRAVATAR_BASE.to_string()
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
            room: RoomConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            auth: AuthConfig::default(),
            avatars: AvatarsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            wire_format: WireFormat::default(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            member_queue_capacity: default_queue_capacity(),
            request_queue_capacity: default_queue_capacity(),
            echo_to_sender: true,
            slow_member: SlowMember::default(),
            evict_after_ms: default_evict_after(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
        }
    }
}

impl Default for AvatarsConfig {
    fn default() -> Self {
        Self {
            chain: default_avatar_chain(),
            directory: default_avatar_dir(),
            url_prefix: default_avatar_prefix(),
            gravatar_base: default_gravatar_base(),
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
    /// Load configuration from `path`, or the first search path that exists,
    /// with environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => SEARCH_PATHS
                .iter()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                .find(|p| p.exists()),
        };

        let mut builder = ::config::Config::builder();
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Loading config file");
            builder = builder.add_source(
                ::config::File::from(file.as_path()).format(::config::FileFormat::Toml),
            );
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("HUDDLE")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("avatars.chain")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.room.member_queue_capacity == 0 || self.room.request_queue_capacity == 0 {
            bail!("Queue capacities must be at least 1");
        }
        if !self.transport.websocket_path.starts_with('/') {
            bail!(
                "websocket_path must start with '/': {}",
                self.transport.websocket_path
            );
        }
        // Surface unknown resolver names at startup
        self.avatar_chain()?;
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
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        let slow_member = match self.room.slow_member {
            SlowMember::Block => SlowMemberPolicy::Block,
            SlowMember::Evict => {
                SlowMemberPolicy::Evict(Duration::from_millis(self.room.evict_after_ms))
            }
            SlowMember::Drop => SlowMemberPolicy::Drop,
        };

        HubConfig {
            request_capacity: self.room.request_queue_capacity,
            member_queue_capacity: self.room.member_queue_capacity,
            echo_to_sender: self.room.echo_to_sender,
            slow_member,
        }
    }

    /// Per-connection pump settings.
    #[must_use]
    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            idle_timeout: (self.heartbeat.timeout_ms > 0)
                .then(|| Duration::from_millis(self.heartbeat.timeout_ms)),
        }
    }

    /// WebSocket transport settings.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: self.transport.max_message_size,
            format: self.transport.wire_format,
        }
    }

    /// Build the avatar chain from the configured resolver names.
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown resolver name.
    pub fn avatar_chain(&self) -> Result<AvatarChain> {
        let mut chain = AvatarChain::default();
        for name in &self.avatars.chain {
            match name.trim() {
                "auth" => chain.push(Arc::new(AuthAvatar)),
                "file_system" => chain.push(Arc::new(FileSystemAvatar::new(
                    &self.avatars.directory,
                    self.avatars.url_prefix.clone(),
                ))),
                "gravatar" => chain.push(Arc::new(GravatarAvatar::new(
                    self.avatars.gravatar_base.clone(),
                ))),
                other => bail!("Unknown avatar resolver: {other}"),
            }
        }
        Ok(chain)
    }
}
