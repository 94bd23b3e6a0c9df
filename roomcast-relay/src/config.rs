//! Configuration system for the Roomcast relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/roomcast/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use crate::hub::DEFAULT_EVENT_QUEUE_CAPACITY;
use crate::peer::DEFAULT_MAILBOX_CAPACITY;
use crate::server::DEFAULT_SOCKET_BUFFER_SIZE;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A resolved value is out of range.
    #[error("invalid setting {key}: must be greater than zero")]
    Zero {
        /// Dotted config key.
        key: &'static str,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    room: RoomFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    socket_buffer_size: Option<usize>,
}

/// `[room]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RoomFileConfig {
    mailbox_capacity: Option<usize>,
    event_queue_capacity: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Roomcast chat room relay server")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "ROOMCAST_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/roomcast/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// WebSocket read/write buffer size in bytes.
    #[arg(long)]
    pub socket_buffer_size: Option<usize>,

    /// Outbound mailbox capacity per connection; a member whose mailbox is
    /// full when a message arrives is disconnected.
    #[arg(long)]
    pub mailbox_capacity: Option<usize>,

    /// Capacity of the hub's event queue.
    #[arg(long)]
    pub event_queue_capacity: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "ROOMCAST_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:3000`).
    pub bind_addr: String,
    /// WebSocket read and write buffer size in bytes.
    pub socket_buffer_size: usize,
    /// Outbound mailbox capacity per connection.
    pub mailbox_capacity: usize,
    /// Capacity of the hub's event queue.
    pub event_queue_capacity: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if a capacity resolves to zero.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file).validate()
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            socket_buffer_size: cli
                .socket_buffer_size
                .or(file.server.socket_buffer_size)
                .unwrap_or(defaults.socket_buffer_size),
            mailbox_capacity: cli
                .mailbox_capacity
                .or(file.room.mailbox_capacity)
                .unwrap_or(defaults.mailbox_capacity),
            event_queue_capacity: cli
                .event_queue_capacity
                .or(file.room.event_queue_capacity)
                .unwrap_or(defaults.event_queue_capacity),
            log_level: cli.log_level.clone(),
        }
    }

    /// Reject values the channels cannot be built with.
    fn validate(self) -> Result<Self, ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Zero {
                key: "room.mailbox_capacity",
            });
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Zero {
                key: "room.event_queue_capacity",
            });
        }
        if self.socket_buffer_size == 0 {
            return Err(ConfigError::Zero {
                key: "server.socket_buffer_size",
            });
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("roomcast").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
