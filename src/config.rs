//! Configuration module for the framekv server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocol::{FrameLimits, DEFAULT_MAX_ARGS, DEFAULT_MAX_MESSAGE_SIZE, HEADER_LEN};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "framekv")]
#[command(version)]
#[command(about = "A single-threaded key-value server speaking a length-prefixed binary protocol", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:12345)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Largest payload a single frame may declare, in bytes
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Largest argument count a single request may declare
    #[arg(long)]
    pub max_args: Option<usize>,

    /// Maximum number of simultaneous client connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Connections beyond this are accepted and dropped
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events drained per poll
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Bytes requested from the socket per read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            event_capacity: default_event_capacity(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

/// Wire protocol limits
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_max_args")]
    pub max_args: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_args: default_max_args(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 12345;

fn default_listen() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_backlog() -> i32 {
    1024
}

fn default_max_connections() -> usize {
    10240
}

fn default_event_capacity() -> usize {
    1024
}

fn default_read_buffer_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_args() -> usize {
    DEFAULT_MAX_ARGS
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub max_connections: usize,
    pub event_capacity: usize,
    pub read_buffer_size: usize,
    pub max_message_size: usize,
    pub max_args: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            event_capacity: default_event_capacity(),
            read_buffer_size: default_read_buffer_size(),
            max_message_size: default_max_message_size(),
            max_args: default_max_args(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = match cli.config {
            Some(ref config_path) => Self::read_file(config_path)?,
            None => TomlConfig::default(),
        };

        Self::from_sources(cli, toml_config)
    }

    /// Read and parse a TOML configuration file.
    pub fn read_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn from_sources(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("listen address '{listen}': {e}")))?;

        let config = Config {
            listen,
            backlog: toml_config.server.backlog,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            event_capacity: toml_config.server.event_capacity,
            read_buffer_size: toml_config.server.read_buffer_size,
            max_message_size: cli
                .max_message_size
                .unwrap_or(toml_config.protocol.max_message_size),
            max_args: cli.max_args.unwrap_or(toml_config.protocol.max_args),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // The payload must at least hold the argument count, and the length
        // has to fit the 32-bit header.
        if self.max_message_size < HEADER_LEN || self.max_message_size > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_message_size must be between {} and {}, got {}",
                HEADER_LEN,
                u32::MAX,
                self.max_message_size
            )));
        }

        for (name, value) in [
            ("max_args", self.max_args),
            ("max_connections", self.max_connections),
            ("event_capacity", self.event_capacity),
            ("read_buffer_size", self.read_buffer_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }

        if self.backlog <= 0 {
            return Err(ConfigError::Invalid(format!(
                "backlog must be positive, got {}",
                self.backlog
            )));
        }

        Ok(())
    }

    /// Codec limits derived from this configuration.
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_message_size: self.max_message_size,
            max_args: self.max_args,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
