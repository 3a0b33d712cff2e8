//! Storage collaborator traits and their shipped implementations
//!
//! The broker core only ever reads connection records and secrets through
//! these traits. The shipped implementations are backed by the broker TOML
//! config and an in-process map; an OS keychain backend would implement
//! `SecretStore` the same way.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

use tiller_core::config::BrokerConfig;
use tiller_core::types::{ConnectionId, ConnectionRecord};
use tiller_core::BrokerError;

/// Read access to stored connection records
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Look up a connection by id
    async fn get(&self, id: &ConnectionId) -> Result<Option<ConnectionRecord>, BrokerError>;

    /// List all stored connections
    async fn list(&self) -> Result<Vec<ConnectionRecord>, BrokerError>;
}

/// Opaque key/value access to stored secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the secret for a connection, if one is stored
    async fn get(&self, id: &ConnectionId) -> Result<Option<String>, BrokerError>;

    /// Store or replace the secret for a connection
    async fn set(&self, id: &ConnectionId, secret: &str) -> Result<(), BrokerError>;
}

/// Connection store backed by the broker config's profile map
pub struct ConfigStore {
    records: HashMap<ConnectionId, ConnectionRecord>,
}

impl ConfigStore {
    /// Build the store from the loaded broker config
    pub fn from_config(config: &BrokerConfig) -> Self {
        let records = config
            .connections
            .iter()
            .map(|(id, profile)| (ConnectionId::new(id.clone()), profile.to_record(id.clone())))
            .collect();
        Self { records }
    }
}

#[async_trait]
impl ConnectionStore for ConfigStore {
    async fn get(&self, id: &ConnectionId) -> Result<Option<ConnectionRecord>, BrokerError> {
        Ok(self.records.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ConnectionRecord>, BrokerError> {
        Ok(self.records.values().cloned().collect())
    }
}

/// In-process secret store, seeded from config passwords
pub struct MemorySecretStore {
    secrets: DashMap<ConnectionId, String>,
}

impl MemorySecretStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            secrets: DashMap::new(),
        }
    }

    /// Create a store seeded with the passwords present in the config
    pub fn from_config(config: &BrokerConfig) -> Self {
        let store = Self::new();
        for (id, profile) in &config.connections {
            if let Some(password) = &profile.password {
                store
                    .secrets
                    .insert(ConnectionId::new(id.clone()), password.clone());
            }
        }
        store
    }
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, id: &ConnectionId) -> Result<Option<String>, BrokerError> {
        Ok(self.secrets.get(id).map(|s| s.clone()))
    }

    async fn set(&self, id: &ConnectionId, secret: &str) -> Result<(), BrokerError> {
        self.secrets.insert(id.clone(), secret.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_core::config::ConnectionProfile;
    use tiller_core::types::AuthMethod;

    fn test_config() -> BrokerConfig {
        let mut config = BrokerConfig::default();
        config.connections.insert(
            "web-1".to_string(),
            ConnectionProfile {
                name: Some("Web server".to_string()),
                host: "10.0.0.10".to_string(),
                port: 22,
                username: "deploy".to_string(),
                auth_method: AuthMethod::Password,
                key_path: None,
                password: Some("hunter2".to_string()),
                services: vec!["nginx".to_string()],
            },
        );
        config
    }

    #[tokio::test]
    async fn test_config_store_lookup() {
        let store = ConfigStore::from_config(&test_config());

        let record = store.get(&ConnectionId::new("web-1")).await.unwrap();
        assert_eq!(record.unwrap().host, "10.0.0.10");

        let missing = store.get(&ConnectionId::new("nope")).await.unwrap();
        assert!(missing.is_none());

        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_secret_store_seeding() {
        let secrets = MemorySecretStore::from_config(&test_config());

        let secret = secrets.get(&ConnectionId::new("web-1")).await.unwrap();
        assert_eq!(secret.as_deref(), Some("hunter2"));

        secrets
            .set(&ConnectionId::new("web-1"), "rotated")
            .await
            .unwrap();
        let secret = secrets.get(&ConnectionId::new("web-1")).await.unwrap();
        assert_eq!(secret.as_deref(), Some("rotated"));
    }
}
