//! Configuration module for the packetlog server.
//!
//! The command line only selects daemon mode. Everything else has a
//! built-in default that an optional TOML file can override; the file is
//! located through the `PACKETLOG_CONFIG` environment variable.

use crate::packet::DEFAULT_MAX_PACKET_SIZE;
use crate::storage::DEFAULT_DATA_FILE;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_ENV: &str = "PACKETLOG_CONFIG";

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "packetlog")]
#[command(version = "0.1.0")]
#[command(about = "Logs newline-delimited packets and echoes the log back", long_about = None)]
pub struct CliArgs {
    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long)]
    pub daemon: bool,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Pending-connection backlog passed to listen(2)
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
        }
    }
}

/// Packet log configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Path of the packet log file
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Bytes per receive and per read-back chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Largest packet accepted before the connection is dropped
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            chunk_size: default_chunk_size(),
            max_packet_size: default_max_packet_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level, used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_backlog() -> i32 {
    5
}

fn default_data_file() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_FILE)
}

fn default_chunk_size() -> usize {
    1024
}

fn default_max_packet_size() -> usize {
    DEFAULT_MAX_PACKET_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub data_file: PathBuf,
    pub chunk_size: usize,
    pub max_packet_size: usize,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub daemon: bool,
}

impl Config {
    /// Load configuration from the command line and the optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::read_file(PathBuf::from(path))?,
            None => TomlConfig::default(),
        };

        Self::resolve(cli, toml_config)
    }

    fn read_file(path: PathBuf) -> Result<TomlConfig, ConfigError> {
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::TomlParse { path, source })
    }

    /// Merge CLI arguments with file values and validate the result.
    pub fn resolve(cli: CliArgs, file: TomlConfig) -> Result<Self, ConfigError> {
        let listen = file
            .server
            .listen
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("listen address '{}'", file.server.listen)))?;

        if file.server.backlog <= 0 {
            return Err(ConfigError::Invalid(format!(
                "backlog {} must be positive",
                file.server.backlog
            )));
        }
        if file.storage.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be non-zero".into()));
        }
        if file.storage.max_packet_size < file.storage.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "max_packet_size {} is smaller than chunk_size {}",
                file.storage.max_packet_size, file.storage.chunk_size
            )));
        }

        Ok(Config {
            listen,
            backlog: file.server.backlog,
            data_file: file.storage.data_file,
            chunk_size: file.storage.chunk_size,
            max_packet_size: file.storage.max_packet_size,
            log_level: file.logging.level,
            log_file: file.logging.file,
            daemon: cli.daemon,
        })
    }

    /// Daemon mode detaches stderr, so without a log file every event
    /// emitted after the fork is lost.
    pub fn discards_daemon_logs(&self) -> bool {
        self.daemon && self.log_file.is_none()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9000)),
            backlog: default_backlog(),
            data_file: default_data_file(),
            chunk_size: default_chunk_size(),
            max_packet_size: default_max_packet_size(),
            log_level: default_log_level(),
            log_file: None,
            daemon: false,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
