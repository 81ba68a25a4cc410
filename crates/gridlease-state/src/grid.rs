//! GridState — the process-wide caches shared by every deployer.
//!
//! Bundles the contract index, network bookkeeping, per-node locks and the
//! user data that is checkpointed next to the contract ids.

use gridlease_core::{GridConfig, NodeId};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::contracts::ContractIndex;
use crate::error::StateResult;
use crate::locks::KeyedLocks;
use crate::network::NetworkState;
use crate::store::StateStorage;
use crate::types::{NetworkData, UserData};

/// Shared local state of the control plane.
///
/// Lock order: a node lock from [`GridState::lock_node`] first, then a
/// network lock, then the short-lived index locks.
#[derive(Debug, Default)]
pub struct GridState {
    pub contracts: ContractIndex,
    pub networks: NetworkState,
    node_locks: KeyedLocks<NodeId>,
    user_data: RwLock<UserData>,
}

impl GridState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize work on a single node.
    pub async fn lock_node(&self, node_id: NodeId) -> tokio::sync::OwnedMutexGuard<()> {
        self.node_locks.lock(&node_id).await
    }

    /// Seed node subnets and network secrets from configuration.
    pub async fn apply_config(&self, config: &GridConfig) {
        for network in &config.networks {
            {
                let mut net = self.networks.lock(&network.name).await;
                for node in &network.nodes {
                    net.set_node_subnet(node.node_id, node.subnet);
                }
            }
            if let Some(secret_key) = &network.secret_key {
                self.user_data.write().await.networks.insert(
                    network.name.clone(),
                    NetworkData {
                        secret_key: secret_key.clone(),
                    },
                );
            }
            debug!(network = %network.name, nodes = network.nodes.len(), "network configured");
        }
    }

    pub async fn user_data(&self) -> UserData {
        self.user_data.read().await.clone()
    }

    pub async fn set_network_data(&self, network: &str, data: NetworkData) {
        self.user_data
            .write()
            .await
            .networks
            .insert(network.to_string(), data);
    }

    /// Load the contract index and user data from durable storage.
    pub async fn load(&self, storage: &dyn StateStorage) -> StateResult<()> {
        let persisted = storage.get()?;
        let contracts = persisted.contract_ids.len();
        self.contracts.replace(persisted.contract_ids).await;
        *self.user_data.write().await = persisted.user_data;
        info!(contracts, "local state loaded");
        Ok(())
    }

    /// Save the contract index and user data to durable storage.
    pub async fn checkpoint(&self, storage: &dyn StateStorage) -> StateResult<()> {
        let contracts = self.contracts.snapshot().await;
        let user_data = self.user_data().await;
        storage.set(&contracts, &user_data)?;
        debug!(contracts = contracts.len(), "local state checkpointed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStore;
    use std::collections::BTreeMap;

    const CONFIG: &str = r#"
[account]
twin_id = 42
identity = "5Fexample"

[[networks]]
name = "net1"
secret_key = "s3cr3t"

[[networks.nodes]]
node_id = 11
subnet = "10.1.2.0/24"
"#;

    #[tokio::test]
    async fn apply_config_seeds_subnets_and_secrets() {
        let state = GridState::new();
        let config = GridConfig::parse(CONFIG).unwrap();
        state.apply_config(&config).await;

        let net = state.networks.get("net1").await.unwrap();
        assert_eq!(net.node_subnet(11).unwrap().to_string(), "10.1.2.0/24");
        assert_eq!(state.user_data().await.networks["net1"].secret_key, "s3cr3t");
    }

    #[tokio::test]
    async fn checkpoint_then_load_round_trips() {
        let store = StateStore::open_in_memory().unwrap();

        let state = GridState::new();
        state.contracts.set(11, 100).await;
        state
            .set_network_data("net1", NetworkData { secret_key: "k".into() })
            .await;
        state.checkpoint(&store).await.unwrap();

        let restored = GridState::new();
        restored.load(&store).await.unwrap();
        assert_eq!(restored.contracts.snapshot().await, BTreeMap::from([(11, 100)]));
        assert_eq!(restored.user_data().await.networks["net1"].secret_key, "k");
    }
}
