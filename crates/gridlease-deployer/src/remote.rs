//! Remote deployer boundary.
//!
//! The remote deployer owns contract creation on chain and bundle delivery to
//! nodes. Its answers may be partial: some nodes got a contract, another
//! failed. [`RemoteOutcome`] carries both halves.

use std::collections::BTreeMap;

use async_trait::async_trait;
use gridlease_core::{ContractId, DeploymentData, NodeId, WireBundle};

/// Contract per node.
pub type ContractMap = BTreeMap<NodeId, ContractId>;

/// Bundle per node.
pub type BundleMap = BTreeMap<NodeId, WireBundle>;

/// Contracts that exist after a remote call, plus the error it hit, if any.
#[derive(Debug, Default)]
pub struct RemoteOutcome {
    pub contracts: ContractMap,
    pub error: Option<anyhow::Error>,
}

impl RemoteOutcome {
    pub fn ok(contracts: ContractMap) -> Self {
        Self {
            contracts,
            error: None,
        }
    }

    pub fn failed(contracts: ContractMap, error: anyhow::Error) -> Self {
        Self {
            contracts,
            error: Some(error),
        }
    }

    /// Contract id for `node_id`, `0` when absent.
    pub fn contract_for(&self, node_id: NodeId) -> ContractId {
        self.contracts.get(&node_id).copied().unwrap_or_default()
    }
}

#[async_trait]
pub trait RemoteDeployer: Send + Sync {
    /// Move the grid from `old` to `new`: create, update or keep contracts.
    async fn deploy(
        &self,
        old: &ContractMap,
        new: &BundleMap,
        data: &BTreeMap<NodeId, DeploymentData>,
        providers: &BTreeMap<NodeId, u64>,
    ) -> RemoteOutcome;

    /// Cancel the contracts in `old` whose node is absent from `new`.
    async fn cancel(&self, old: &ContractMap, new: &BundleMap) -> RemoteOutcome;

    /// Running bundles for the given contracts.
    async fn get_deployments(&self, contracts: &ContractMap) -> anyhow::Result<BundleMap>;
}
