//! Broker state: the single orchestration context
//!
//! All long-lived mutable state (the terminal registry, the active-poller
//! slot, and the broadcaster's subscriber set) is owned here, constructed
//! once per process, then shared with the dispatcher.

use std::sync::Arc;
use std::time::Instant;

use tiller_core::config::BrokerConfig;

use crate::broadcast::EventBroadcaster;
use crate::metrics::MetricsPoller;
use crate::store::{ConfigStore, ConnectionStore, MemorySecretStore, SecretStore};
use crate::terminal::TerminalRegistry;

/// Shared state for the broker daemon
pub struct BrokerState {
    /// Configuration
    pub config: BrokerConfig,
    /// Connection records collaborator
    pub store: Arc<dyn ConnectionStore>,
    /// Secret storage collaborator
    pub secrets: Arc<dyn SecretStore>,
    /// Event fan-out to IPC clients
    pub broadcaster: Arc<EventBroadcaster>,
    /// Live terminal sessions
    pub terminals: Arc<TerminalRegistry>,
    /// The single active-poller slot
    pub poller: Arc<MetricsPoller>,
    /// When the broker started
    started_at: Instant,
}

impl BrokerState {
    /// Create broker state with the config-backed stores
    pub fn new(config: BrokerConfig) -> Self {
        let store = Arc::new(ConfigStore::from_config(&config));
        let secrets = Arc::new(MemorySecretStore::from_config(&config));
        Self::with_stores(config, store, secrets)
    }

    /// Create broker state with explicit store implementations
    pub fn with_stores(
        config: BrokerConfig,
        store: Arc<dyn ConnectionStore>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let terminals = Arc::new(TerminalRegistry::new(
            Arc::clone(&broadcaster),
            config.connect_timeout,
        ));

        Self {
            config,
            store,
            secrets,
            broadcaster,
            terminals,
            poller: Arc::new(MetricsPoller::new()),
            started_at: Instant::now(),
        }
    }

    /// Seconds since the broker started
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Release every long-lived resource: stop polling and drain the
    /// terminal registry. Called on process shutdown.
    pub async fn shutdown(&self) {
        self.poller.stop().await;
        self.terminals.drain().await;
    }
}
