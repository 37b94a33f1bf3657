//! Configuration module for fakelink.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the fake peer
#[derive(Parser, Debug)]
#[command(name = "fakelink")]
#[command(author = "fakelink authors")]
#[command(version = "0.1.0")]
#[command(about = "A fake server peer for typing raw protocol lines at an uplink", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Name this peer registers under
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// Shared secret sent in the PASS line
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Uplink host to connect to
    #[arg(short = 'u', long)]
    pub uplink: Option<String>,

    /// Uplink port
    #[arg(long)]
    pub port: Option<u16>,

    /// Do not echo traffic to stdout
    #[arg(short, long)]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity and handshake configuration
#[derive(Debug, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// Protocol announced in the first handshake line
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Free-form description carried by the SERVER line
    #[serde(default = "default_description")]
    pub description: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            password: default_password(),
            protocol: default_protocol(),
            description: default_description(),
        }
    }
}

/// Uplink connection configuration
#[derive(Debug, Deserialize)]
pub struct UplinkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Connection attempts before giving up (0 = retry forever)
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Initial delay between attempts, doubled after each failure
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Console echo configuration
#[derive(Debug, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_echo")]
    pub echo: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            echo: default_echo(),
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

fn default_name() -> String {
    "test.server".to_string()
}

fn default_password() -> String {
    "test.pass".to_string()
}

fn default_protocol() -> String {
    "dreamforge".to_string()
}

fn default_description() -> String {
    "test server".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6667
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_connect_attempts() -> u32 {
    1
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_echo() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Who this peer claims to be, and where it connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub name: String,
    pub password: String,
    pub uplink: String,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub identity: PeerIdentity,
    pub port: u16,
    pub protocol: String,
    pub description: String,
    pub connect_timeout: Duration,
    pub connect_attempts: u32,
    pub reconnect_delay: Duration,
    pub poll_interval: Duration,
    pub echo: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = match cli.config {
            Some(ref path) => TomlConfig::from_file(path)?,
            None => TomlConfig::default(),
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge parsed CLI args over a TOML config.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            peer,
            uplink,
            console,
            logging,
        } = toml_config;

        let config = Config {
            identity: PeerIdentity {
                name: cli.name.unwrap_or(peer.name),
                password: cli.password.unwrap_or(peer.password),
                uplink: cli.uplink.unwrap_or(uplink.host),
            },
            port: cli.port.unwrap_or(uplink.port),
            protocol: peer.protocol,
            description: peer.description,
            connect_timeout: Duration::from_millis(uplink.connect_timeout_ms),
            connect_attempts: uplink.connect_attempts,
            reconnect_delay: Duration::from_millis(uplink.reconnect_delay_ms),
            poll_interval: Duration::from_millis(uplink.poll_interval_ms),
            echo: console.echo && !cli.quiet,
            log_level: cli.log_level.unwrap_or(logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Tokens on the wire are space separated, so the name must be one token.
        if self.identity.name.is_empty() || self.identity.name.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "peer name '{}' must be a single non-empty token",
                self.identity.name
            )));
        }
        if self.identity.uplink.is_empty() {
            return Err(ConfigError::Invalid("uplink host is empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl TomlConfig {
    /// Read and parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Config pointing at a local uplink, with echo off and fast retries.
#[cfg(test)]
pub(crate) fn test_config(port: u16) -> Config {
    Config {
        identity: PeerIdentity {
            name: default_name(),
            password: default_password(),
            uplink: default_host(),
        },
        port,
        protocol: default_protocol(),
        description: default_description(),
        connect_timeout: Duration::from_secs(2),
        connect_attempts: 1,
        reconnect_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(10),
        echo: false,
        log_level: default_log_level(),
    }
}
