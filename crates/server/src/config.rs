//! Configuration of the push OTA daemon.
//!
//! Values are merged in this order: built-in defaults, the TOML file, then
//! environment variables.
//!
//! The file is taken from `PUSHOTA_CONFIG`, or `./pushota.toml` if that is
//! not set. A missing default file is not an error.

use std::env;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use micro_ota::connection::ReceiverConfig;
use serde::Deserialize;
use thiserror::Error;
use tracing::Level;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8888;

/// Smallest receive buffer accepted in the configuration
pub const MIN_BUFFER_SIZE: usize = 64;

const DEFAULT_CONFIG_FILE: &str = "pushota.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid toml: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub fn invalid<S: ToString>(str: S) -> Self {
        Self::Invalid { reason: str.to_string() }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OtaConfig {
    /// Serve push updates at all
    pub enabled: bool,
    /// IPv4 address to listen on
    pub bind_address: Ipv4Addr,
    pub port: u16,
    /// Answer `GET` with the running firmware version
    pub get_version: bool,
    /// Receive buffer capacity in bytes
    pub buffer_size: usize,
    /// Idle time in seconds before keepalive probes start
    pub keepalive_idle: u64,
    /// Seconds between keepalive probes
    pub keepalive_interval: u64,
    /// Unanswered probes before the connection is dropped
    pub keepalive_count: u32,
    pub log_level: String,
    pub storage: StorageConfig,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: Ipv4Addr::UNSPECIFIED,
            port: DEFAULT_PORT,
            get_version: true,
            buffer_size: micro_ota::connection::DEFAULT_BUFFER_SIZE,
            keepalive_idle: 5,
            keepalive_interval: 5,
            keepalive_count: 3,
            log_level: "info".to_string(),
            storage: StorageConfig::default(),
        }
    }
}

/// Where firmware slots are kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub dir: PathBuf,
    /// Slot labels, in update order
    pub slots: Vec<String>,
    /// Capacity of each slot in bytes
    pub slot_capacity: u64,
    /// Version reported for the running firmware
    pub version: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("ota"),
            slots: vec!["ota_0".to_string(), "ota_1".to_string()],
            slot_capacity: 1024 * 1024,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl OtaConfig {
    /// The address the listener binds to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind_address, self.port))
    }

    /// The part of the configuration the receiver needs
    pub fn receiver_config(&self) -> ReceiverConfig {
        ReceiverConfig { buffer_size: self.buffer_size, version_query: self.get_version }
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        Level::from_str(&self.log_level).map_err(|_| ConfigError::invalid(format!("unknown log level {}", self.log_level)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::invalid(format!("buffer_size {} is below {MIN_BUFFER_SIZE}", self.buffer_size)));
        }
        if self.storage.slots.is_empty() {
            return Err(ConfigError::invalid("at least one storage slot is required"));
        }
        if self.keepalive_count == 0 || self.keepalive_idle == 0 || self.keepalive_interval == 0 {
            return Err(ConfigError::invalid("keepalive settings must be positive"));
        }
        self.log_level()?;
        Ok(())
    }
}

/// Parses a configuration from TOML text. Missing fields take their default.
pub fn from_toml_str(content: &str) -> Result<OtaConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads the configuration from `path`, or from the default location.
///
/// # Errors
///
/// Returns an error if an explicitly given file can't be read, if the file is
/// not valid TOML or if the merged configuration fails validation.
pub fn load(path: Option<&Path>) -> Result<OtaConfig, ConfigError> {
    let explicit = path.map(Path::to_path_buf).or_else(|| env::var_os("PUSHOTA_CONFIG").map(PathBuf::from));

    let mut config = match explicit {
        Some(path) => read_file(&path)?,
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if path.exists() { read_file(&path)? } else { OtaConfig::default() }
        }
    };

    apply_environment_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<OtaConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    from_toml_str(&content)
}

/// Applies environment variable overrides.
///
/// Supported variables:
/// - `PUSHOTA_ENABLED` -> `enabled`
/// - `PUSHOTA_PORT` -> `port`
/// - `PUSHOTA_GET_VERSION` -> `get_version`
/// - `PUSHOTA_LOG_LEVEL` -> `log_level`
/// - `PUSHOTA_STORAGE_DIR` -> `storage.dir`
/// - `PUSHOTA_VERSION` -> `storage.version`
pub fn apply_environment_overrides(config: &mut OtaConfig) {
    apply_overrides(config, |key| env::var(key).ok());
}

/// Applies overrides looked up by variable name.
pub fn apply_overrides<F>(config: &mut OtaConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("PUSHOTA_ENABLED") {
        config.enabled = parse_flag(&value);
    }
    if let Some(port) = lookup("PUSHOTA_PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.port = port;
    }
    if let Some(value) = lookup("PUSHOTA_GET_VERSION") {
        config.get_version = parse_flag(&value);
    }
    if let Some(value) = lookup("PUSHOTA_LOG_LEVEL") {
        config.log_level = value;
    }
    if let Some(value) = lookup("PUSHOTA_STORAGE_DIR") {
        config.storage.dir = PathBuf::from(value);
    }
    if let Some(value) = lookup("PUSHOTA_VERSION") {
        config.storage.version = value;
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
