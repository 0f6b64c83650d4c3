//! Configuration module for the frame-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over built-in defaults.

use clap::Parser;
use serde::Deserialize;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "frame-echo")]
#[command(version)]
#[command(about = "A length-prefixed echo server with request pipelining", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:1234)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent client connections
    #[arg(short = 'c', long)]
    pub max_connections: Option<usize>,

    /// Listen backlog passed to listen(2)
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Maximum readiness events handled per poll
    #[arg(long)]
    pub events_capacity: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Maximum readiness events handled per poll
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            events_capacity: default_events_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
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

const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 1234);

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_max_connections() -> usize {
    10240
}

fn default_backlog() -> i32 {
    1024
}

fn default_events_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub backlog: i32,
    pub events_capacity: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            listen: DEFAULT_LISTEN,
            max_connections: server.max_connections,
            backlog: server.backlog,
            events_capacity: server.events_capacity,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args over the TOML file they point to, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path).map_err(|source| {
                ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                }
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let config = Config {
            listen: listen
                .parse::<SocketAddr>()
                .map_err(|source| ConfigError::InvalidListen {
                    addr: listen.clone(),
                    source,
                })?,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            events_capacity: cli
                .events_capacity
                .unwrap_or(toml_config.server.events_capacity),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1"));
        }
        if self.events_capacity == 0 {
            return Err(ConfigError::Invalid("events_capacity must be at least 1"));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog must be positive"));
        }
        Ok(())
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

    #[error("Invalid listen address '{addr}': {source}")]
    InvalidListen {
        addr: String,
        source: AddrParseError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:1234");
        assert_eq!(config.server.max_connections, 10240);
        assert_eq!(config.server.backlog, 1024);
        assert_eq!(config.server.events_capacity, 64);
        assert_eq!(config.logging.level, "info");

        let resolved = Config::from_args(CliArgs::default()).unwrap();
        assert_eq!(resolved.listen, Config::default().listen);
        assert_eq!(
            Config::default().listen,
            default_listen().parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:4000"
            max_connections = 100
            backlog = 128

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:4000");
        assert_eq!(config.server.max_connections, 100);
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.server.events_capacity, 64);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nlisten = \"127.0.0.1:4000\"\nmax_connections = 100"
        )
        .unwrap();

        let cli = CliArgs::try_parse_from([
            "frame-echo",
            "--config",
            file.path().to_str().unwrap(),
            "--listen",
            "127.0.0.1:5000",
            "--log-level",
            "warn",
        ])
        .unwrap();
        let config = Config::from_args(cli).unwrap();

        assert_eq!(config.listen, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_invalid_listen() {
        let cli = CliArgs {
            listen: Some("not-an-address".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::InvalidListen { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/frame-echo.toml")),
            ..Default::default()
        };
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::FileRead { .. })
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let cli = CliArgs {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(matches!(Config::from_args(cli), Err(ConfigError::Invalid(_))));
    }
}
