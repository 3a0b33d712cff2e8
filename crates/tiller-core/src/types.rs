//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Unique identifier for a stored connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Client-supplied identifier for a terminal session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalId(pub String);

impl TerminalId {
    /// Create a new terminal ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TerminalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a connection authenticates against the remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Password authentication (inline or via the secret store)
    Password,
    /// Private key file authentication
    Key,
    /// Unrecognized method; the auth resolver yields no credential
    #[serde(other)]
    Unknown,
}

/// A stored connection record, read-only to the broker core.
///
/// Owned by the connection store; the broker only ever reads these to
/// resolve auth descriptors and monitored-service lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Unique identifier
    pub id: ConnectionId,

    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,

    /// Remote hostname or IP
    pub host: String,

    /// SSH port
    pub port: u16,

    /// SSH username
    pub username: String,

    /// Authentication method
    pub auth_method: AuthMethod,

    /// Path to the private key file (required when `auth_method` is `Key`)
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// systemd services to check during metrics polling
    #[serde(default)]
    pub services: Vec<String>,
}
