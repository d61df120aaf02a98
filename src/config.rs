//! Configuration module for the tcp-reactor server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::ReactorSettings;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the reactor server
#[derive(Parser, Debug)]
#[command(name = "tcp-reactor")]
#[command(version)]
#[command(about = "A single-threaded TCP echo reactor", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (IPv4 literal or host name)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Readiness-wait timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Maximum number of simultaneous clients
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Maximum bytes read from one client per pass
    #[arg(long)]
    pub receive_size: Option<usize>,

    /// Drop buffered input when a peer closes instead of handing it to the handler
    #[arg(long)]
    pub no_flush_on_close: bool,

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
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Readiness-wait timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_receive_size")]
    pub receive_size: usize,
    #[serde(default = "default_flush_on_close")]
    pub flush_on_close: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            timeout: default_timeout(),
            max_connections: default_max_connections(),
            receive_size: default_receive_size(),
            flush_on_close: default_flush_on_close(),
        }
    }
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

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    1
}

fn default_max_connections() -> usize {
    1024
}

fn default_receive_size() -> usize {
    4096
}

fn default_flush_on_close() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub address: String,
    pub port: u16,
    /// Readiness-wait timeout in whole seconds
    pub timeout: u64,
    pub max_connections: usize,
    pub receive_size: usize,
    pub flush_on_close: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = match cli.config {
            Some(ref config_path) => {
                let contents = std::fs::read_to_string(config_path)
                    .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
                toml::from_str(&contents)
                    .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
            }
            None => TomlConfig::default(),
        };

        let config = Config {
            address: cli.address.unwrap_or(toml_config.server.address),
            port: cli.port.unwrap_or(toml_config.server.port),
            timeout: cli.timeout.unwrap_or(toml_config.server.timeout),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            receive_size: cli
                .receive_size
                .unwrap_or(toml_config.server.receive_size),
            flush_on_close: toml_config.server.flush_on_close && !cli.no_flush_on_close,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections", "must be at least 1"));
        }
        if self.receive_size == 0 {
            return Err(ConfigError::Invalid("receive_size", "must be at least 1"));
        }
        Ok(())
    }

    /// Reactor settings for this configuration, with no diagnostics sink and
    /// a fresh stop handle.
    pub fn reactor_settings(&self) -> ReactorSettings {
        ReactorSettings {
            address: self.address.clone(),
            port: self.port,
            timeout: Duration::from_secs(self.timeout),
            max_connections: self.max_connections,
            receive_size: self.receive_size,
            flush_on_close: self.flush_on_close,
            ..ReactorSettings::default()
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("tcp-reactor").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.address, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.timeout, 1);
        assert!(config.server.flush_on_close);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            address = "127.0.0.1"
            port = 9000
            timeout = 5
            max_connections = 16
            flush_on_close = false

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.address, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.timeout, 5);
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.server.receive_size, 4096);
        assert!(!config.server.flush_on_close);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let config = Config::from_args(cli(&[
            "-a",
            "127.0.0.1",
            "-p",
            "9100",
            "-t",
            "3",
            "--no-flush-on-close",
            "--log-level",
            "trace",
        ]))
        .unwrap();

        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.port, 9100);
        assert_eq!(config.timeout, 3);
        assert!(!config.flush_on_close);
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.max_connections, 1024);
    }

    #[test]
    fn test_cli_overrides_file() {
        let path = std::env::temp_dir().join(format!("tcp-reactor-{}.toml", std::process::id()));
        std::fs::write(&path, "[server]\nport = 7000\ntimeout = 9\n").unwrap();

        let config =
            Config::from_args(cli(&["--config", path.to_str().unwrap(), "-p", "7001"])).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 7001);
        assert_eq!(config.timeout, 9);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = Config::from_args(cli(&["--config", "/nonexistent/tcp-reactor.toml"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
        assert!(err.to_string().contains("/nonexistent/tcp-reactor.toml"));
    }

    #[test]
    fn test_zero_receive_size_rejected() {
        let err = Config::from_args(cli(&["--receive-size", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("receive_size", _)));
    }

    #[test]
    fn test_reactor_settings() {
        let config = Config::from_args(cli(&["-t", "2", "--max-connections", "8"])).unwrap();
        let settings = config.reactor_settings();
        assert_eq!(settings.timeout, Duration::from_secs(2));
        assert_eq!(settings.max_connections, 8);
        assert!(settings.diagnostics.is_none());
        assert!(settings.stop.is_running());
    }
}
