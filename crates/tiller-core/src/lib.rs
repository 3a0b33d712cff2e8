//! tiller-core: Shared types and IPC schema for the tiller broker
//!
//! This crate provides the domain types, error taxonomy, configuration
//! structures, and the wire schema used between the desktop client and
//! the broker daemon.

pub mod config;
pub mod error;
pub mod ipc;
pub mod types;

pub use error::BrokerError;
pub use types::{ConnectionId, ConnectionRecord, TerminalId};
