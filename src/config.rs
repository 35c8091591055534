//! Configuration for the frameserve server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "frameserve")]
#[command(author = "frameserve authors")]
#[command(version)]
#[command(about = "A TCP server for length-prefixed binary messages", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Largest accepted payload in bytes (0 = unlimited)
    #[arg(long)]
    pub max_packet_size: Option<u32>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Number of dispatch workers (0 = one task per message)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server identity and bind address
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: default_port(),
            version: default_version(),
        }
    }
}

/// Packet, connection and send buffer limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted payload in bytes (0 = unlimited)
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Capacity of each connection's buffered send channel
    #[serde(default = "default_send_buffer_len")]
    pub send_buffer_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_packet_size: default_max_packet_size(),
            max_connections: default_max_connections(),
            send_buffer_len: default_send_buffer_len(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Deserialize)]
pub struct WorkersConfig {
    /// Number of workers (0 = one task per message)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Capacity of each worker's task queue
    #[serde(default = "default_queue_len")]
    pub queue_len: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            queue_len: default_queue_len(),
        }
    }
}

/// Optional deadlines in milliseconds (0 = disabled)
#[derive(Debug, Deserialize, Default)]
pub struct TimeoutsConfig {
    #[serde(default)]
    pub read_ms: u64,
    #[serde(default)]
    pub write_ms: u64,
    #[serde(default)]
    pub handler_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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

fn default_name() -> String {
    "frameserve".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8999
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_max_packet_size() -> u32 {
    4096
}

fn default_max_connections() -> usize {
    12000
}

fn default_send_buffer_len() -> usize {
    1024
}

fn default_pool_size() -> usize {
    10
}

fn default_queue_len() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub version: String,
    pub max_packet_size: u32,
    pub max_connections: usize,
    pub send_buffer_len: usize,
    pub worker_pool_size: usize,
    pub worker_queue_len: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub handler_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(None, TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve configuration from already parsed CLI args.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(Some(cli), toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: Option<CliArgs>, toml_config: TomlConfig) -> Self {
        let TomlConfig {
            server,
            limits,
            workers,
            timeouts,
            logging,
        } = toml_config;

        let mut config = Config {
            name: server.name,
            host: server.host,
            port: server.port,
            version: server.version,
            max_packet_size: limits.max_packet_size,
            max_connections: limits.max_connections,
            send_buffer_len: limits.send_buffer_len,
            worker_pool_size: workers.pool_size,
            worker_queue_len: workers.queue_len,
            read_timeout: millis(timeouts.read_ms),
            write_timeout: millis(timeouts.write_ms),
            handler_timeout: millis(timeouts.handler_ms),
            log_level: logging.level,
        };

        if let Some(cli) = cli {
            config.host = cli.host.unwrap_or(config.host);
            config.port = cli.port.unwrap_or(config.port);
            config.max_packet_size = cli.max_packet_size.unwrap_or(config.max_packet_size);
            config.max_connections = cli.max_connections.unwrap_or(config.max_connections);
            config.worker_pool_size = cli.workers.unwrap_or(config.worker_pool_size);
            if cli.log_level != "info" {
                config.log_level = cli.log_level;
            }
        }

        config
    }

    /// `host:port` string the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8999");
        assert_eq!(config.max_packet_size, 4096);
        assert_eq!(config.max_connections, 12000);
        assert_eq!(config.worker_pool_size, 10);
        assert_eq!(config.worker_queue_len, 1024);
        assert_eq!(config.send_buffer_len, 1024);
        assert!(config.read_timeout.is_none());
        assert!(config.handler_timeout.is_none());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            name = "game-gateway"
            host = "127.0.0.1"
            port = 7777

            [limits]
            max_packet_size = 1024
            max_connections = 3

            [workers]
            pool_size = 4
            queue_len = 16

            [timeouts]
            read_ms = 1500

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let config = Config::merge(None, toml_config);
        assert_eq!(config.name, "game-gateway");
        assert_eq!(config.bind_address(), "127.0.0.1:7777");
        assert_eq!(config.max_packet_size, 1024);
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.send_buffer_len, 1024);
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.worker_queue_len, 16);
        assert_eq!(config.read_timeout, Some(Duration::from_millis(1500)));
        assert!(config.write_timeout.is_none());
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 7777

            [workers]
            pool_size = 4
            "#,
        )
        .unwrap();

        let cli = CliArgs::parse_from(["frameserve", "--port", "9000", "-w", "0"]);
        let config = Config::merge(Some(cli), toml_config);
        assert_eq!(config.port, 9000);
        assert_eq!(config.worker_pool_size, 0);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::parse_from(["frameserve", "-c", "/nonexistent/frameserve.toml"]);
        match Config::from_args(cli) {
            Err(ConfigError::FileRead(path, _)) => {
                assert_eq!(path, PathBuf::from("/nonexistent/frameserve.toml"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
