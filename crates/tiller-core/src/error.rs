//! Error types for the tiller broker

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Transport or auth failure while opening a connection or channel
    #[error("Connection failed: {0}")]
    Connect(String),

    /// A remote command exited with a non-zero status
    #[error("Remote command exited with status {exit_code}: {stderr}")]
    Command { exit_code: u32, stderr: String },

    /// A private key file could not be read
    #[error("Failed to read key file {path}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A referenced connection id does not exist
    #[error("Connection not found: {0}")]
    NotFound(String),

    /// Malformed or unexpected remote output
    #[error("Malformed remote output: {0}")]
    Protocol(String),

    /// The connection or secret store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Build a `Connect` error from any displayable cause
    pub fn connect(cause: impl std::fmt::Display) -> Self {
        Self::Connect(cause.to_string())
    }

    /// Build a `Storage` error from any displayable cause
    pub fn storage(cause: impl std::fmt::Display) -> Self {
        Self::Storage(cause.to_string())
    }
}
