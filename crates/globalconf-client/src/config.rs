//! Client configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Download and storage settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Admin control endpoint settings.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Path to the configuration anchor JSON file.
    #[serde(default = "default_anchor_path")]
    pub anchor_path: PathBuf,

    /// Directory downloaded configuration is stored in.
    #[serde(default = "default_configuration_path")]
    pub configuration_path: PathBuf,

    /// Seconds between scheduled refresh cycles.
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,

    /// Per-request timeout when downloading a directory.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,

    /// Largest directory body accepted from a location.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

/// Network configuration for the admin control endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "globalconf_client=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_anchor_path() -> PathBuf {
    PathBuf::from("configuration-anchor.json")
}

fn default_configuration_path() -> PathBuf {
    PathBuf::from("globalconf")
}

fn default_update_interval() -> u64 {
    60
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_max_document_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    5675
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            anchor_path: default_anchor_path(),
            configuration_path: default_configuration_path(),
            update_interval_seconds: default_update_interval(),
            fetch_timeout_seconds: default_fetch_timeout(),
            max_document_bytes: default_max_document_bytes(),
        }
    }
}

impl ClientConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting has a value the client cannot run with.
    #[error("invalid setting {name}: {reason}")]
    Invalid {
        name: &'static str,
        reason: &'static str,
    },
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `GLOBALCONF_ANCHOR_PATH` overrides `client.anchor_path`
/// - `GLOBALCONF_CONFIGURATION_PATH` overrides `client.configuration_path`
/// - `GLOBALCONF_UPDATE_INTERVAL` overrides `client.update_interval_seconds`
/// - `GLOBALCONF_FETCH_TIMEOUT` overrides `client.fetch_timeout_seconds`
/// - `GLOBALCONF_ADMIN_HOST` overrides `admin.host`
/// - `GLOBALCONF_ADMIN_PORT` overrides `admin.port`
/// - `GLOBALCONF_LOG_LEVEL` overrides `logging.level`
/// - `GLOBALCONF_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the interval or timeout is zero.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(path) = var("GLOBALCONF_ANCHOR_PATH") {
        config.client.anchor_path = PathBuf::from(path);
    }
    if let Some(path) = var("GLOBALCONF_CONFIGURATION_PATH") {
        config.client.configuration_path = PathBuf::from(path);
    }
    if let Some(interval) = var("GLOBALCONF_UPDATE_INTERVAL") {
        if let Ok(parsed) = interval.parse() {
            config.client.update_interval_seconds = parsed;
        }
    }
    if let Some(timeout) = var("GLOBALCONF_FETCH_TIMEOUT") {
        if let Ok(parsed) = timeout.parse() {
            config.client.fetch_timeout_seconds = parsed;
        }
    }
    if let Some(host) = var("GLOBALCONF_ADMIN_HOST") {
        if let Ok(parsed) = host.parse() {
            config.admin.host = parsed;
        }
    }
    if let Some(port) = var("GLOBALCONF_ADMIN_PORT") {
        if let Ok(parsed) = port.parse() {
            config.admin.port = parsed;
        }
    }
    if let Some(level) = var("GLOBALCONF_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("GLOBALCONF_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.client.update_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                name: "client.update_interval_seconds",
                reason: "must be greater than zero",
            });
        }
        if self.client.fetch_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                name: "client.fetch_timeout_seconds",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}
