//! Local contract index: what is deployed on each node per the last commit.

use std::collections::BTreeMap;

use gridlease_core::{ContractId, NO_CONTRACT, NodeId};
use tokio::sync::RwLock;

/// `NodeId → ContractId` for every node with a live lease.
///
/// Deploy and cancel mutate it; sync only reads it.
#[derive(Debug, Default)]
pub struct ContractIndex {
    inner: RwLock<BTreeMap<NodeId, ContractId>>,
}

impl ContractIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, node_id: NodeId) -> Option<ContractId> {
        self.inner.read().await.get(&node_id).copied()
    }

    /// Record `contract_id` for `node_id`. A zero id removes the entry.
    /// Returns the previous contract id.
    pub async fn set(&self, node_id: NodeId, contract_id: ContractId) -> Option<ContractId> {
        let mut inner = self.inner.write().await;
        if contract_id == NO_CONTRACT {
            inner.remove(&node_id)
        } else {
            inner.insert(node_id, contract_id)
        }
    }

    pub async fn remove(&self, node_id: NodeId) -> Option<ContractId> {
        self.inner.write().await.remove(&node_id)
    }

    /// Copy of the whole index.
    pub async fn snapshot(&self) -> BTreeMap<NodeId, ContractId> {
        self.inner.read().await.clone()
    }

    /// Replace the whole index, dropping zero ids.
    pub async fn replace(&self, contracts: BTreeMap<NodeId, ContractId>) {
        let mut inner = self.inner.write().await;
        *inner = contracts
            .into_iter()
            .filter(|(_, id)| *id != NO_CONTRACT)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let index = ContractIndex::new();
        assert_eq!(index.set(11, 100).await, None);
        assert_eq!(index.set(11, 101).await, Some(100));
        assert_eq!(index.get(11).await, Some(101));
        assert_eq!(index.remove(11).await, Some(101));
        assert_eq!(index.get(11).await, None);
    }

    #[tokio::test]
    async fn zero_contract_is_never_stored() {
        let index = ContractIndex::new();
        index.set(11, 100).await;
        assert_eq!(index.set(11, NO_CONTRACT).await, Some(100));
        assert!(index.snapshot().await.is_empty());

        index.replace(BTreeMap::from([(11, 0), (12, 200)])).await;
        assert_eq!(index.snapshot().await, BTreeMap::from([(12, 200)]));
    }
}
