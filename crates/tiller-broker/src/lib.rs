//! tiller-broker: Local daemon driving remote hosts over SSH
//!
//! The broker runs on the local machine and serves the desktop client over
//! a localhost IPC socket. It opens interactive shells on remote hosts,
//! polls host health metrics, runs one-shot process/cron operations, and
//! fans server-originated data out to subscribed clients.

pub mod auth;
pub mod broadcast;
pub mod dispatch;
pub mod metrics;
pub mod ops;
pub mod server;
pub mod ssh;
pub mod state;
pub mod store;
pub mod terminal;

pub use server::IpcServer;
pub use state::BrokerState;
