//! Daemon configuration.
//!
//! Resolution order, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. TOML file (`--config`, or `$XDG_CONFIG_HOME/cartographer/cartod.toml`)
//! 3. Environment (`CARTOGRAPHER_HOST`, `CARTOGRAPHER_PORT`, `PORT`)
//! 4. Command-line flags (applied by the CLI)

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding `server.host`.
pub const ENV_HOST: &str = "CARTOGRAPHER_HOST";
/// Environment variable overriding `server.port`.
pub const ENV_PORT: &str = "CARTOGRAPHER_PORT";
/// Conventional fallback port variable.
pub const ENV_PORT_FALLBACK: &str = "PORT";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Config
// ============================================================================

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub session: SessionConfig,
}

/// HTTP listener and upgrade settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address. Local-only by default.
    pub host: IpAddr,
    pub port: u16,
    /// Permitted `Origin` values. Empty means any origin is accepted.
    pub allowed_origins: Vec<String>,
    /// Transport read buffer in bytes.
    pub read_buffer_size: usize,
    /// Transport write buffer in bytes.
    pub write_buffer_size: usize,
    /// How long in-flight HTTP requests get to finish on shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 8080,
            allowed_origins: Vec::new(),
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Connection registry limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Capacity of the broadcast relay between producers and the hub loop.
    pub relay_capacity: usize,
    /// Capacity of the register/unregister command channel.
    pub command_capacity: usize,
    /// Maximum number of simultaneously registered sessions.
    pub max_sessions: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            relay_capacity: 256,
            command_capacity: 64,
            max_sessions: 1024,
        }
    }
}

/// Per-session queueing and liveness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Outbound queue capacity in envelopes.
    pub queue_capacity: usize,
    /// Deadline for a single transport write.
    pub write_timeout_ms: u64,
    /// Window in which a pong must arrive.
    pub pong_wait_ms: u64,
    /// Interval between server pings. Must be shorter than `pong_wait_ms`.
    pub ping_period_ms: u64,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Most queued envelopes merged into one transport frame.
    pub max_coalesce: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let pong_wait_ms = 60_000;
        Self {
            queue_capacity: 256,
            write_timeout_ms: 10_000,
            pong_wait_ms,
            ping_period_ms: pong_wait_ms * 9 / 10,
            max_message_size: 512 * 1024,
            max_coalesce: 256,
        }
    }
}

impl SessionConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }
}

impl Config {
    /// Default location of the config file, if a config dir exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cartographer").join("cartod.toml"))
    }

    /// Parses a TOML document. Missing sections and fields take defaults.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Loads the explicit file if given, else the default file if it
    /// exists, else defaults; then applies environment overrides and
    /// validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_HOST) {
            self.server.host = value.parse().map_err(|_| ConfigError::Env {
                name: ENV_HOST,
                value: value.clone(),
            })?;
        }

        let port = lookup(ENV_PORT)
            .map(|v| (ENV_PORT, v))
            .or_else(|| lookup(ENV_PORT_FALLBACK).map(|v| (ENV_PORT_FALLBACK, v)));
        if let Some((name, value)) = port {
            self.server.port = value
                .parse()
                .map_err(|_| ConfigError::Env { name, value: value.clone() })?;
        }

        Ok(())
    }

    /// Rejects settings the hub cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("hub.relay_capacity", self.hub.relay_capacity),
            ("hub.command_capacity", self.hub.command_capacity),
            ("hub.max_sessions", self.hub.max_sessions),
            ("session.queue_capacity", self.session.queue_capacity),
            ("session.max_message_size", self.session.max_message_size),
            ("session.max_coalesce", self.session.max_coalesce),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }

        if self.session.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.write_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.session.ping_period_ms == 0
            || self.session.ping_period_ms >= self.session.pong_wait_ms
        {
            return Err(ConfigError::Invalid(format!(
                "session.ping_period_ms ({}) must be non-zero and shorter than \
                 session.pong_wait_ms ({})",
                self.session.ping_period_ms, self.session.pong_wait_ms
            )));
        }

        Ok(())
    }
}
