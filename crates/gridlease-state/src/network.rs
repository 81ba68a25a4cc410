//! Per-network bookkeeping: node subnets and consumed host ids.
//!
//! Each network keeps the subnet assigned to every node it spans and, per
//! `(node, contract)`, the host ids that contract's VMs occupy. The IP
//! allocator reads the union of a node's host ids; deploy and sync overwrite
//! the entry of a single contract.
//!
//! [`NetworkState`] hands out one async lock per network name so that
//! bookkeeping of unrelated networks can be touched concurrently.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use gridlease_core::{ContractId, NodeId, Subnet};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// Bookkeeping of a single user network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Network {
    subnets: BTreeMap<NodeId, Subnet>,
    host_ids: BTreeMap<NodeId, BTreeMap<ContractId, BTreeSet<u8>>>,
}

impl Network {
    pub fn node_subnet(&self, node_id: NodeId) -> Option<Subnet> {
        self.subnets.get(&node_id).copied()
    }

    pub fn set_node_subnet(&mut self, node_id: NodeId, subnet: Subnet) {
        self.subnets.insert(node_id, subnet);
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.subnets.keys().copied()
    }

    /// Union of host ids used on `node_id` across all of its contracts.
    pub fn used_host_ids(&self, node_id: NodeId) -> BTreeSet<u8> {
        self.host_ids
            .get(&node_id)
            .map(|per_contract| per_contract.values().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// Host ids recorded for a single contract on `node_id`.
    pub fn deployment_host_ids(&self, node_id: NodeId, contract_id: ContractId) -> BTreeSet<u8> {
        self.host_ids
            .get(&node_id)
            .and_then(|per_contract| per_contract.get(&contract_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the host ids recorded for `(node_id, contract_id)`.
    pub fn set_deployment_host_ids(
        &mut self,
        node_id: NodeId,
        contract_id: ContractId,
        ids: impl IntoIterator<Item = u8>,
    ) {
        let ids: BTreeSet<u8> = ids.into_iter().collect();
        debug!(node_id, contract_id, hosts = ids.len(), "host ids replaced");
        self.host_ids
            .entry(node_id)
            .or_default()
            .insert(contract_id, ids);
    }

    /// Forget the host ids of `(node_id, contract_id)`. Returns true if any were recorded.
    pub fn delete_deployment_host_ids(&mut self, node_id: NodeId, contract_id: ContractId) -> bool {
        let Some(per_contract) = self.host_ids.get_mut(&node_id) else {
            return false;
        };
        let existed = per_contract.remove(&contract_id).is_some();
        if per_contract.is_empty() {
            self.host_ids.remove(&node_id);
        }
        existed
    }

    /// Whether `(node_id, contract_id)` has bookkeeping in this network.
    pub fn tracks(&self, node_id: NodeId, contract_id: ContractId) -> bool {
        self.host_ids
            .get(&node_id)
            .is_some_and(|per_contract| per_contract.contains_key(&contract_id))
    }
}

/// All networks known to this process, keyed by network name.
#[derive(Debug, Default)]
pub struct NetworkState {
    networks: RwLock<HashMap<String, Arc<Mutex<Network>>>>,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the named network, creating empty bookkeeping on first use.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<Network> {
        let network = {
            let networks = self.networks.read().await;
            networks.get(name).cloned()
        };
        let network = match network {
            Some(network) => network,
            None => {
                let mut networks = self.networks.write().await;
                Arc::clone(networks.entry(name.to_string()).or_default())
            }
        };
        network.lock_owned().await
    }

    /// Names of all networks with bookkeeping, sorted.
    pub async fn names(&self) -> Vec<String> {
        let networks = self.networks.read().await;
        let mut names: Vec<String> = networks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Name of the network that tracks host ids for `(node_id, contract_id)`.
    pub async fn find_owner(&self, node_id: NodeId, contract_id: ContractId) -> Option<String> {
        for name in self.names().await {
            if self.lock(&name).await.tracks(node_id, contract_id) {
                return Some(name);
            }
        }
        None
    }

    /// Clone of the named network's bookkeeping, if it exists.
    pub async fn get(&self, name: &str) -> Option<Network> {
        let network = {
            let networks = self.networks.read().await;
            networks.get(name).cloned()
        }?;
        let guard = network.lock().await;
        Some(guard.clone())
    }
}
