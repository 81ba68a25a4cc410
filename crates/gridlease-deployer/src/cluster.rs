//! ClusterDeployer — drives k3s clusters spread over several grid nodes.
//!
//! A cluster owns one contract per grid node it runs on, tracked in
//! [`K8sCluster::node_deployment_ids`]. All touched nodes are locked in
//! ascending order before anything else, then the same commit rules as
//! [`DeploymentDeployer`](crate::DeploymentDeployer) apply per node.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gridlease_core::subnet::host_id;
use gridlease_core::{
    ContractId, DEFAULT_CLUSTER_SOLUTION_TYPE, DeploymentData, GridConfig, K8S_DEPLOYMENT_TYPE,
    K8sCluster, K8sNode, NO_CONTRACT, NodeId, TwinId, WireBundle,
};
use gridlease_ipam::assign_ips;
use gridlease_state::GridState;
use gridlease_workloads::{ClusterCodec, CodecError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::deployer::{check_balance, revalidate};
use crate::error::{DeployerError, DeployerResult};
use crate::ledger::LedgerClient;
use crate::remote::{BundleMap, ContractMap, RemoteDeployer};

/// Reconciles [`K8sCluster`]s against the grid.
pub struct ClusterDeployer {
    twin_id: TwinId,
    identity: String,
    min_balance: u128,
    ledger: Arc<dyn LedgerClient>,
    remote: Arc<dyn RemoteDeployer>,
    state: Arc<GridState>,
}

impl ClusterDeployer {
    pub fn new(
        config: &GridConfig,
        ledger: Arc<dyn LedgerClient>,
        remote: Arc<dyn RemoteDeployer>,
        state: Arc<GridState>,
    ) -> Self {
        Self {
            twin_id: config.account.twin_id,
            identity: config.account.identity.clone(),
            min_balance: u128::from(config.deployer.min_balance),
            ledger,
            remote,
            state,
        }
    }

    /// Lock every node in `nodes`, lowest id first.
    async fn lock_nodes(&self, nodes: impl IntoIterator<Item = NodeId>) -> Vec<OwnedMutexGuard<()>> {
        let ordered: BTreeSet<NodeId> = nodes.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for node_id in ordered {
            guards.push(self.state.lock_node(node_id).await);
        }
        guards
    }

    // ── Generate ──────────────────────────────────────────────────

    /// Build one bundle per grid node hosting part of `cluster`.
    ///
    /// Unassigned machine addresses are filled in place from each node's
    /// subnet; the network bookkeeping is only read.
    pub async fn generate(&self, cluster: &mut K8sCluster) -> DeployerResult<BundleMap> {
        for node_id in cluster.grid_nodes() {
            let network = self.state.networks.lock(&cluster.network_name).await;
            let subnet = network.node_subnet(node_id).ok_or_else(|| {
                DeployerError::SubnetNotAssigned {
                    network: cluster.network_name.clone(),
                    node_id,
                }
            })?;
            let mut used = network.used_host_ids(node_id);
            drop(network);

            let mut machines: Vec<K8sNode> = cluster
                .nodes()
                .filter(|machine| machine.node_id == node_id)
                .cloned()
                .collect();
            assign_ips(&subnet, &mut used, &mut machines)?;
            for (machine, assigned) in machines_mut(cluster)
                .filter(|machine| machine.node_id == node_id)
                .zip(machines)
            {
                machine.ip = assigned.ip;
            }
        }

        let metadata = cluster_data(cluster)
            .to_json()
            .map_err(|source| CodecError::Encode {
                name: cluster.master.name.clone(),
                source,
            })?;
        Ok(cluster
            .encode_nodes()?
            .into_iter()
            .map(|(node_id, workloads)| {
                let mut bundle = WireBundle::new(self.twin_id, workloads);
                bundle.metadata = metadata.clone();
                (node_id, bundle)
            })
            .collect())
    }

    // ── Deploy ────────────────────────────────────────────────────

    /// Create or update `cluster` on every grid node it uses.
    ///
    /// Contracts the remote deployer reports are recorded per node even when
    /// the call also failed. Nodes the cluster no longer uses have their
    /// contracts cancelled once the deploy succeeded.
    pub async fn deploy(&self, cluster: &mut K8sCluster) -> DeployerResult<()> {
        let touched: Vec<NodeId> = cluster
            .grid_nodes()
            .into_iter()
            .chain(cluster.node_deployment_ids.keys().copied())
            .collect();
        let _nodes = self.lock_nodes(touched).await;

        self.validate(cluster).await?;
        if cluster.solution_type.is_empty() {
            cluster.solution_type = DEFAULT_CLUSTER_SOLUTION_TYPE.to_string();
        }
        let new = self.generate(cluster).await?;

        let old = self.state.contracts.snapshot().await;
        let data: BTreeMap<NodeId, DeploymentData> = new
            .keys()
            .map(|&node_id| (node_id, cluster_data(cluster)))
            .collect();

        debug!(master = %cluster.master.name, nodes = new.len(), "deploying cluster");
        let outcome = self.remote.deploy(&old, &new, &data, &BTreeMap::new()).await;

        for &node_id in new.keys() {
            let contract_id = outcome.contract_for(node_id);
            if contract_id != NO_CONTRACT {
                self.commit(cluster, node_id, contract_id).await;
            }
        }
        if let Some(e) = outcome.error {
            warn!(master = %cluster.master.name, error = %e, "remote cluster deploy failed");
            return Err(DeployerError::RemoteDeployFailed(e));
        }

        let left: ContractMap = cluster
            .node_deployment_ids
            .iter()
            .filter(|(node_id, _)| !new.contains_key(node_id))
            .map(|(&node_id, &contract_id)| (node_id, contract_id))
            .collect();
        if !left.is_empty() {
            self.release(cluster, &left).await?;
        }
        Ok(())
    }

    async fn commit(&self, cluster: &mut K8sCluster, node_id: NodeId, contract_id: ContractId) {
        let hosts: Vec<u8> = cluster
            .nodes()
            .filter(|machine| machine.node_id == node_id)
            .filter_map(|machine| host_id(&machine.ip))
            .collect();

        let mut network = self.state.networks.lock(&cluster.network_name).await;
        let previous = self
            .state
            .contracts
            .set(node_id, contract_id)
            .await
            .filter(|&prev| prev != contract_id);
        if let Some(prev) = previous {
            network.delete_deployment_host_ids(node_id, prev);
        }
        network.set_deployment_host_ids(node_id, contract_id, hosts);
        drop(network);

        cluster.node_deployment_ids.insert(node_id, contract_id);
        info!(node_id, contract_id, master = %cluster.master.name, "cluster node committed");
    }

    // ── Cancel ────────────────────────────────────────────────────

    /// Cancel every contract of `cluster`.
    ///
    /// Contracts the remote deployer still reports stay on the cluster.
    pub async fn cancel(&self, cluster: &mut K8sCluster) -> DeployerResult<()> {
        let contracts = cluster.node_deployment_ids.clone();
        let _nodes = self.lock_nodes(contracts.keys().copied()).await;

        check_balance(self.ledger.as_ref(), &self.identity, self.min_balance).await?;
        if contracts.is_empty() {
            return Ok(());
        }
        self.release(cluster, &contracts).await
    }

    /// Cancel `contracts` and drop the local state of those that went away.
    async fn release(&self, cluster: &mut K8sCluster, contracts: &ContractMap) -> DeployerResult<()> {
        let outcome = self.remote.cancel(contracts, &BundleMap::new()).await;

        for (&node_id, &contract_id) in contracts {
            let residual = outcome.contract_for(node_id);
            if residual != NO_CONTRACT {
                warn!(node_id, contract_id = residual, "cluster contract survived cancel");
                cluster.node_deployment_ids.insert(node_id, residual);
                continue;
            }
            let mut network = self.state.networks.lock(&cluster.network_name).await;
            network.delete_deployment_host_ids(node_id, contract_id);
            if self.state.contracts.get(node_id).await == Some(contract_id) {
                self.state.contracts.remove(node_id).await;
            }
            drop(network);
            cluster.node_deployment_ids.remove(&node_id);
            info!(node_id, contract_id, "cluster node cancelled");
        }

        match outcome.error {
            Some(e) => Err(DeployerError::RemoteCancelFailed(e)),
            None => Ok(()),
        }
    }

    // ── Sync ──────────────────────────────────────────────────────

    /// Rebuild `cluster` from the bundles its live contracts run.
    ///
    /// Contracts the ledger no longer holds are dropped from the cluster
    /// along with their host ids. The contract index is only read.
    pub async fn sync(&self, cluster: &mut K8sCluster) -> DeployerResult<()> {
        let known = cluster.node_deployment_ids.clone();
        let _nodes = self.lock_nodes(known.keys().copied()).await;

        let mut live = ContractMap::new();
        for (&node_id, &contract_id) in &known {
            if revalidate(self.ledger.as_ref(), contract_id).await? != NO_CONTRACT {
                live.insert(node_id, contract_id);
            } else {
                self.state
                    .networks
                    .lock(&cluster.network_name)
                    .await
                    .delete_deployment_host_ids(node_id, contract_id);
                info!(node_id, contract_id, "cluster contract no longer valid");
            }
        }
        if live.is_empty() {
            cluster.node_deployment_ids.clear();
            return Ok(());
        }

        let bundles = self
            .remote
            .get_deployments(&live)
            .await
            .map_err(DeployerError::RemoteFetchFailed)?;
        let mut observed = K8sCluster::from_bundles(&bundles)?;
        for (&node_id, &contract_id) in &live {
            if !bundles.contains_key(&node_id) {
                warn!(node_id, contract_id, "no running deployment reported for cluster contract");
                observed.node_deployment_ids.insert(node_id, contract_id);
            }
        }

        {
            let mut network = self.state.networks.lock(&observed.network_name).await;
            for (&node_id, &contract_id) in &observed.node_deployment_ids {
                if !bundles.contains_key(&node_id) {
                    continue;
                }
                let hosts: Vec<u8> = observed
                    .nodes()
                    .filter(|machine| machine.node_id == node_id)
                    .filter_map(|machine| host_id(&machine.ip))
                    .collect();
                network.set_deployment_host_ids(node_id, contract_id, hosts);
            }
        }

        sort_workers_like(&mut observed.workers, &cluster.workers);
        debug!(
            master = %observed.master.name,
            workers = observed.workers.len(),
            "cluster refreshed"
        );
        *cluster = observed;
        Ok(())
    }

    // ── Validate ──────────────────────────────────────────────────

    /// Check the account balance and the cluster's structure.
    pub async fn validate(&self, cluster: &K8sCluster) -> DeployerResult<()> {
        check_balance(self.ledger.as_ref(), &self.identity, self.min_balance).await?;
        cluster.validate()?;
        Ok(())
    }
}

fn cluster_data(cluster: &K8sCluster) -> DeploymentData {
    DeploymentData::new(K8S_DEPLOYMENT_TYPE, &cluster.master.name, &cluster.solution_type)
}

fn machines_mut(cluster: &mut K8sCluster) -> impl Iterator<Item = &mut K8sNode> {
    std::iter::once(&mut cluster.master).chain(cluster.workers.iter_mut())
}

/// Workers known to `previous` come first, in its order.
fn sort_workers_like(workers: &mut [K8sNode], previous: &[K8sNode]) {
    let positions: BTreeMap<&str, usize> = previous
        .iter()
        .enumerate()
        .map(|(idx, worker)| (worker.name.as_str(), idx))
        .collect();
    workers.sort_by_key(|worker| {
        positions
            .get(worker.name.as_str())
            .copied()
            .unwrap_or(usize::MAX)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryLedger, MemoryRemote, RemoteCall};
    use crate::remote::RemoteOutcome;
    use anyhow::anyhow;
    use gridlease_core::Subnet;

    const IDENTITY: &str = "5Fexample";
    const FLIST: &str = "https://hub.grid.tf/tf-official-apps/threefoldtech-k3s-latest.flist";

    fn machine(name: &str, node_id: NodeId) -> K8sNode {
        K8sNode {
            name: name.to_string(),
            node_id,
            disk_size_gb: 5,
            planetary: true,
            flist: FLIST.to_string(),
            cpu: 2,
            memory_mb: 1024,
            ..Default::default()
        }
    }

    fn test_cluster() -> K8sCluster {
        let mut master = machine("K8sforTesting", 11);
        master.ip = "10.1.0.2".to_string();
        K8sCluster {
            master,
            workers: vec![machine("worker1", 11)],
            token: "tokens".to_string(),
            network_name: "network".to_string(),
            ..Default::default()
        }
    }

    struct Harness {
        deployer: ClusterDeployer,
        ledger: Arc<MemoryLedger>,
        remote: Arc<MemoryRemote>,
        state: Arc<GridState>,
    }

    async fn test_harness() -> Harness {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_balance(IDENTITY, 100_000).await;
        let remote = Arc::new(MemoryRemote::new());
        let state = Arc::new(GridState::new());
        {
            let mut net = state.networks.lock("network").await;
            net.set_node_subnet(11, "10.1.0.0/24".parse::<Subnet>().unwrap());
            net.set_node_subnet(12, "10.1.1.0/24".parse::<Subnet>().unwrap());
        }
        let deployer = ClusterDeployer::new(
            &GridConfig::new(7, IDENTITY),
            ledger.clone(),
            remote.clone(),
            state.clone(),
        );
        Harness {
            deployer,
            ledger,
            remote,
            state,
        }
    }

    async fn host_ids(state: &GridState, node_id: NodeId, contract_id: ContractId) -> BTreeSet<u8> {
        state
            .networks
            .get("network")
            .await
            .map(|net| net.deployment_host_ids(node_id, contract_id))
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn generate_builds_one_bundle_per_grid_node() {
        let h = test_harness().await;
        let mut cluster = test_cluster();

        let bundles = h.deployer.generate(&mut cluster).await.unwrap();

        assert_eq!(cluster.workers[0].ip, "10.1.0.3");
        let expected = cluster.encode_nodes().unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[&11].workloads, expected[&11]);
        assert_eq!(bundles[&11].twin_id, 7);
        let data = bundles[&11].deployment_data().unwrap();
        assert_eq!(data.kind, K8S_DEPLOYMENT_TYPE);
        assert_eq!(data.name, "K8sforTesting");
    }

    #[tokio::test]
    async fn generate_requires_subnet_on_every_node() {
        let h = test_harness().await;
        let mut cluster = test_cluster();
        cluster.workers.push(machine("worker2", 13));

        let err = h.deployer.generate(&mut cluster).await.unwrap_err();
        assert!(matches!(err, DeployerError::SubnetNotAssigned { node_id: 13, .. }));
    }

    #[tokio::test]
    async fn deploy_records_contract_per_node() {
        let h = test_harness().await;
        let mut cluster = test_cluster();

        h.deployer.deploy(&mut cluster).await.unwrap();

        let contract_id = cluster.node_deployment_ids[&11];
        assert_ne!(contract_id, NO_CONTRACT);
        assert_eq!(cluster.node_deployment_ids.len(), 1);
        assert_eq!(cluster.solution_type, DEFAULT_CLUSTER_SOLUTION_TYPE);
        assert_eq!(h.state.contracts.get(11).await, Some(contract_id));
        assert_eq!(host_ids(&h.state, 11, contract_id).await, BTreeSet::from([2, 3]));

        let calls = h.remote.calls().await;
        assert!(matches!(&calls[0], RemoteCall::Deploy { old, .. } if old.is_empty()));
    }

    #[tokio::test]
    async fn deploy_spans_several_nodes() {
        let h = test_harness().await;
        let mut cluster = test_cluster();
        cluster.workers.push(machine("worker2", 12));

        h.deployer.deploy(&mut cluster).await.unwrap();

        assert_eq!(cluster.workers[1].ip, "10.1.1.2");
        assert_eq!(
            cluster.node_deployment_ids.keys().copied().collect::<Vec<_>>(),
            vec![11, 12]
        );
        let on_12 = cluster.node_deployment_ids[&12];
        assert_eq!(host_ids(&h.state, 12, on_12).await, BTreeSet::from([2]));
    }

    #[tokio::test]
    async fn update_passes_full_index_and_keeps_contract() {
        let h = test_harness().await;
        h.state.contracts.set(11, 40).await;
        h.state.contracts.set(20, 90).await;
        let mut cluster = test_cluster();

        h.deployer.deploy(&mut cluster).await.unwrap();

        let calls = h.remote.calls().await;
        let RemoteCall::Deploy { old, .. } = &calls[0] else {
            panic!("expected a deploy call, got {:?}", calls[0]);
        };
        assert_eq!(old, &ContractMap::from([(11, 40), (20, 90)]));
        assert_eq!(cluster.node_deployment_ids, ContractMap::from([(11, 40)]));
    }

    #[tokio::test]
    async fn failed_update_still_records_reported_contract() {
        let h = test_harness().await;
        h.state.contracts.set(11, 40).await;
        h.remote
            .script_deploy(RemoteOutcome::failed(ContractMap::from([(11, 40)]), anyhow!("error")))
            .await;
        let mut cluster = test_cluster();

        let err = h.deployer.deploy(&mut cluster).await.unwrap_err();

        assert!(matches!(err, DeployerError::RemoteDeployFailed(_)));
        assert_eq!(cluster.node_deployment_ids, ContractMap::from([(11, 40)]));
        assert_eq!(host_ids(&h.state, 11, 40).await, BTreeSet::from([2, 3]));
    }

    #[tokio::test]
    async fn shrinking_cluster_cancels_left_node() {
        let h = test_harness().await;
        let mut cluster = test_cluster();
        cluster.workers.push(machine("worker2", 12));
        h.deployer.deploy(&mut cluster).await.unwrap();
        let on_12 = cluster.node_deployment_ids[&12];

        cluster.workers.pop();
        h.deployer.deploy(&mut cluster).await.unwrap();

        assert_eq!(cluster.node_deployment_ids.keys().copied().collect::<Vec<_>>(), vec![11]);
        assert_eq!(h.state.contracts.get(12).await, None);
        assert!(host_ids(&h.state, 12, on_12).await.is_empty());
        assert!(h.remote.running(on_12).await.is_none());
    }

    #[tokio::test]
    async fn cancel_clears_node_contracts() {
        let h = test_harness().await;
        let mut cluster = test_cluster();
        h.deployer.deploy(&mut cluster).await.unwrap();
        let contract_id = cluster.node_deployment_ids[&11];

        h.deployer.cancel(&mut cluster).await.unwrap();

        assert!(cluster.node_deployment_ids.is_empty());
        assert_eq!(h.state.contracts.get(11).await, None);
        assert!(host_ids(&h.state, 11, contract_id).await.is_empty());
    }

    #[tokio::test]
    async fn failed_cancel_keeps_node_contracts() {
        let h = test_harness().await;
        let mut cluster = test_cluster();
        cluster.node_deployment_ids = ContractMap::from([(11, 40)]);
        h.state.contracts.set(11, 40).await;
        h.remote
            .script_cancel(RemoteOutcome::failed(ContractMap::from([(11, 40)]), anyhow!("error")))
            .await;

        let err = h.deployer.cancel(&mut cluster).await.unwrap_err();

        assert!(matches!(err, DeployerError::RemoteCancelFailed(_)));
        assert_eq!(cluster.node_deployment_ids, ContractMap::from([(11, 40)]));
        assert_eq!(h.state.contracts.get(11).await, Some(40));
    }

    #[tokio::test]
    async fn sync_rebuilds_cluster_from_running_bundles() {
        let h = test_harness().await;
        let mut cluster = test_cluster();
        cluster.workers.push(machine("worker2", 12));
        h.deployer.deploy(&mut cluster).await.unwrap();
        for &contract_id in cluster.node_deployment_ids.values() {
            h.ledger.activate(contract_id).await;
        }
        let deployed = cluster.clone();

        let mut observed = K8sCluster {
            node_deployment_ids: deployed.node_deployment_ids.clone(),
            ..Default::default()
        };
        h.deployer.sync(&mut observed).await.unwrap();

        assert_eq!(observed, deployed);
    }

    #[tokio::test]
    async fn sync_drops_invalid_contracts() {
        let h = test_harness().await;
        let mut cluster = test_cluster();
        cluster.workers.push(machine("worker2", 12));
        h.deployer.deploy(&mut cluster).await.unwrap();
        let on_11 = cluster.node_deployment_ids[&11];
        let on_12 = cluster.node_deployment_ids[&12];
        h.ledger.activate(on_11).await;

        h.deployer.sync(&mut cluster).await.unwrap();

        assert_eq!(cluster.node_deployment_ids, ContractMap::from([(11, on_11)]));
        assert!(cluster.workers.iter().all(|worker| worker.node_id == 11));
        assert!(host_ids(&h.state, 12, on_12).await.is_empty());
        assert_eq!(h.state.contracts.get(12).await, Some(on_12));
    }

    #[tokio::test]
    async fn invalid_cluster_is_rejected_before_remote_call() {
        let h = test_harness().await;
        let mut cluster = test_cluster();
        cluster.network_name.clear();

        let err = h.deployer.deploy(&mut cluster).await.unwrap_err();

        assert!(matches!(err, DeployerError::InvalidDeployment(_)));
        assert!(h.remote.calls().await.is_empty());
    }
}
