//! Broker configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::types::{AuthMethod, ConnectionId, ConnectionRecord};

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Configuration for the broker daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// IPC port for desktop/CLI communication (localhost only)
    pub ipc_port: u16,

    /// Timeout for opening SSH connections
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Default metrics polling interval
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Stored connection profiles, keyed by connection id
    #[serde(default)]
    pub connections: HashMap<String, ConnectionProfile>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ipc_port: 22360,
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(5000),
            connections: HashMap::new(),
        }
    }
}

impl BrokerConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }
}

/// Profile for a stored connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,

    /// Remote hostname or IP
    pub host: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// SSH username
    pub username: String,

    /// Authentication method
    pub auth_method: AuthMethod,

    /// Path to the private key file
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Stored password; seeds the secret store on startup
    #[serde(default)]
    pub password: Option<String>,

    /// systemd services to check during metrics polling
    #[serde(default)]
    pub services: Vec<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl ConnectionProfile {
    /// Build the read-only record the broker core consumes
    pub fn to_record(&self, id: impl Into<ConnectionId>) -> ConnectionRecord {
        ConnectionRecord {
            id: id.into(),
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            auth_method: self.auth_method,
            key_path: self.key_path.clone(),
            services: self.services.clone(),
        }
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tiller")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("broker.toml")
}

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<BrokerConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: BrokerConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config(path: &Path, config: &BrokerConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

// Serde helpers for whole-second / whole-millisecond durations
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
