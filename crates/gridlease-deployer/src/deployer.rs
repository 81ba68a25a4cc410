//! DeploymentDeployer — drives single-node deployments onto the grid.
//!
//! Every operation that touches a node runs under that node's lock from
//! [`GridState`]. Local state is committed only after the remote deployer
//! answered; dropping an in-flight `deploy`, `cancel` or `sync` leaves the
//! contract index, network bookkeeping and snapshots as they were.

use std::collections::BTreeMap;
use std::sync::Arc;

use gridlease_core::{
    ContractId, Deployment, DeploymentData, GridConfig, NO_CONTRACT, NodeId, TwinId,
    VM_DEPLOYMENT_TYPE, WireBundle,
};
use gridlease_ipam::assign_ips;
use gridlease_state::GridState;
use gridlease_workloads::{CodecError, decode_bundle, encode_deployment};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{DeployerError, DeployerResult};
use crate::ledger::{LedgerClient, LedgerError};
use crate::remote::{BundleMap, RemoteDeployer};

/// Reconciles [`Deployment`]s against the grid.
pub struct DeploymentDeployer {
    twin_id: TwinId,
    identity: String,
    min_balance: u128,
    default_solution_type: String,
    ledger: Arc<dyn LedgerClient>,
    remote: Arc<dyn RemoteDeployer>,
    state: Arc<GridState>,
    /// Last observed deployment per live contract.
    snapshots: RwLock<BTreeMap<ContractId, Deployment>>,
    /// Bumped on every local commit or teardown of a node.
    epochs: RwLock<BTreeMap<NodeId, u64>>,
}

impl DeploymentDeployer {
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
            default_solution_type: config.deployer.default_solution_type.clone(),
            ledger,
            remote,
            state,
            snapshots: RwLock::new(BTreeMap::new()),
            epochs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn state(&self) -> &Arc<GridState> {
        &self.state
    }

    /// Last observed state of `contract_id`.
    pub async fn snapshot(&self, contract_id: ContractId) -> Option<Deployment> {
        self.snapshots.read().await.get(&contract_id).cloned()
    }

    pub async fn snapshots(&self) -> BTreeMap<ContractId, Deployment> {
        self.snapshots.read().await.clone()
    }

    // ── Generate ──────────────────────────────────────────────────

    /// Build the bundle for `deployment`'s node.
    ///
    /// Unassigned VM addresses are filled in place. The network bookkeeping
    /// is only read; host ids are recorded once the grid accepted the bundle.
    pub async fn generate(&self, deployment: &mut Deployment) -> DeployerResult<BundleMap> {
        if !deployment.vms.is_empty() {
            let network = self.state.networks.lock(&deployment.network_name).await;
            let subnet = network.node_subnet(deployment.node_id).ok_or_else(|| {
                DeployerError::SubnetNotAssigned {
                    network: deployment.network_name.clone(),
                    node_id: deployment.node_id,
                }
            })?;
            let mut used = network.used_host_ids(deployment.node_id);
            drop(network);
            assign_ips(&subnet, &mut used, &mut deployment.vms)?;
        }

        let mut bundle = WireBundle::new(self.twin_id, encode_deployment(deployment)?);
        bundle.metadata = deployment_data(deployment)
            .to_json()
            .map_err(|source| CodecError::Encode {
                name: deployment.name.clone(),
                source,
            })?;
        Ok(BundleMap::from([(deployment.node_id, bundle)]))
    }

    // ── Deploy ────────────────────────────────────────────────────

    /// Create or update `deployment` on its node.
    ///
    /// A contract the remote deployer reports for the node is committed even
    /// when the call also failed; the failure is returned afterwards.
    pub async fn deploy(&self, deployment: &mut Deployment) -> DeployerResult<()> {
        let _node = self.state.lock_node(deployment.node_id).await;

        self.validate(deployment).await?;
        if deployment.solution_type.is_empty() {
            deployment.solution_type = self.default_solution_type.clone();
        }
        let new = self.generate(deployment).await?;

        let old = self.state.contracts.snapshot().await;
        let data = BTreeMap::from([(deployment.node_id, deployment_data(deployment))]);
        let providers: BTreeMap<NodeId, u64> = deployment
            .solution_provider
            .map(|provider| (deployment.node_id, provider))
            .into_iter()
            .collect();

        debug!(
            node_id = deployment.node_id,
            name = %deployment.name,
            "deploying"
        );
        let outcome = self.remote.deploy(&old, &new, &data, &providers).await;

        let contract_id = outcome.contract_for(deployment.node_id);
        if contract_id != NO_CONTRACT {
            self.commit(deployment, contract_id).await;
        }

        match outcome.error {
            Some(e) => {
                warn!(node_id = deployment.node_id, contract_id, error = %e, "remote deploy failed");
                Err(DeployerError::RemoteDeployFailed(e))
            }
            None => Ok(()),
        }
    }

    async fn commit(&self, deployment: &mut Deployment, contract_id: ContractId) {
        let node_id = deployment.node_id;
        deployment.contract_id = contract_id;

        let mut network = if deployment.network_name.is_empty() {
            None
        } else {
            Some(self.state.networks.lock(&deployment.network_name).await)
        };
        let previous = self
            .state
            .contracts
            .set(node_id, contract_id)
            .await
            .filter(|&prev| prev != contract_id);
        if let Some(network) = network.as_mut() {
            if let Some(prev) = previous {
                network.delete_deployment_host_ids(node_id, prev);
            }
            network.set_deployment_host_ids(node_id, contract_id, deployment.vm_host_ids());
        }
        drop(network);

        let mut snapshots = self.snapshots.write().await;
        if let Some(prev) = previous {
            snapshots.remove(&prev);
        }
        snapshots.insert(contract_id, deployment.clone());
        drop(snapshots);
        self.bump_epoch(node_id).await;
        info!(node_id, contract_id, name = %deployment.name, "deployment committed");
    }

    async fn bump_epoch(&self, node_id: NodeId) {
        *self.epochs.write().await.entry(node_id).or_default() += 1;
    }

    async fn epoch(&self, node_id: NodeId) -> u64 {
        self.epochs.read().await.get(&node_id).copied().unwrap_or_default()
    }

    // ── Cancel ────────────────────────────────────────────────────

    /// Cancel the contract of `deployment`'s node.
    ///
    /// If the remote deployer still reports a contract for the node, it is
    /// kept on `deployment` and local state is left alone.
    pub async fn cancel(&self, deployment: &mut Deployment) -> DeployerResult<()> {
        let node_id = deployment.node_id;
        let _node = self.state.lock_node(node_id).await;

        self.validate(deployment).await?;

        let old = self.state.contracts.snapshot().await;
        let new: BundleMap = old
            .keys()
            .filter(|&&other| other != node_id)
            .map(|&other| (other, WireBundle::default()))
            .collect();

        debug!(node_id, contract_id = deployment.contract_id, "cancelling");
        let outcome = self.remote.cancel(&old, &new).await;

        let residual = outcome.contract_for(node_id);
        if residual != NO_CONTRACT {
            warn!(node_id, contract_id = residual, "contract survived cancel");
            deployment.contract_id = residual;
        } else {
            let cancelled = old.get(&node_id).copied().unwrap_or(deployment.contract_id);
            self.teardown(node_id, cancelled, &deployment.network_name).await;
            self.state.contracts.remove(node_id).await;
            self.bump_epoch(node_id).await;
            deployment.contract_id = NO_CONTRACT;
            info!(node_id, contract_id = cancelled, "deployment cancelled");
        }

        match outcome.error {
            Some(e) => Err(DeployerError::RemoteCancelFailed(e)),
            None => Ok(()),
        }
    }

    /// Drop host ids and the snapshot of a contract that no longer exists.
    async fn teardown(&self, node_id: NodeId, contract_id: ContractId, network_name: &str) {
        if contract_id == NO_CONTRACT {
            return;
        }
        let network_name = match network_name {
            "" => self.state.networks.find_owner(node_id, contract_id).await,
            name => Some(name.to_string()),
        };
        if let Some(name) = network_name {
            self.state
                .networks
                .lock(&name)
                .await
                .delete_deployment_host_ids(node_id, contract_id);
        }
        self.snapshots.write().await.remove(&contract_id);
    }

    // ── Sync ──────────────────────────────────────────────────────

    /// Rebuild snapshots and host-id bookkeeping from what the grid runs.
    ///
    /// The contract index is only read. Nodes whose contract is no longer
    /// valid lose their snapshot and host ids and are skipped, as are nodes
    /// committed locally after the bundles were fetched.
    pub async fn sync(&self) -> DeployerResult<()> {
        let contracts = self.state.contracts.snapshot().await;
        if contracts.is_empty() {
            return Ok(());
        }
        let epochs = self.epochs.read().await.clone();
        let bundles = self
            .remote
            .get_deployments(&contracts)
            .await
            .map_err(DeployerError::RemoteFetchFailed)?;

        for (node_id, contract_id) in contracts {
            let _node = self.state.lock_node(node_id).await;
            let fetched_at = epochs.get(&node_id).copied().unwrap_or_default();
            if self.state.contracts.get(node_id).await != Some(contract_id)
                || self.epoch(node_id).await != fetched_at
            {
                debug!(node_id, contract_id, "contract changed during sync, skipping node");
                continue;
            }

            let valid = self.sync_contract(contract_id).await?;
            if valid == NO_CONTRACT {
                let network_name = self
                    .snapshot(contract_id)
                    .await
                    .map(|dl| dl.network_name)
                    .unwrap_or_default();
                self.teardown(node_id, contract_id, &network_name).await;
                info!(node_id, contract_id, "contract no longer valid, local state dropped");
                continue;
            }

            let Some(bundle) = bundles.get(&node_id) else {
                warn!(node_id, contract_id, "no running deployment reported for contract");
                continue;
            };
            self.refresh(node_id, contract_id, bundle).await;
        }
        Ok(())
    }

    async fn refresh(&self, node_id: NodeId, contract_id: ContractId, bundle: &WireBundle) {
        let decoded = decode_bundle(bundle);
        let previous = self.snapshot(contract_id).await;

        let mut network_name = previous
            .as_ref()
            .map(|dl| dl.network_name.clone())
            .filter(|name| !name.is_empty());
        if network_name.is_none() {
            network_name = self.state.networks.find_owner(node_id, contract_id).await;
        }
        if network_name.is_none() {
            network_name = decoded
                .vms
                .first()
                .map(|vm| vm.network_name.clone())
                .filter(|name| !name.is_empty());
        }
        let network_name = network_name.unwrap_or_default();

        if !network_name.is_empty() {
            self.state
                .networks
                .lock(&network_name)
                .await
                .set_deployment_host_ids(node_id, contract_id, decoded.vm_host_ids());
        }

        let data = bundle.deployment_data().unwrap_or_default();
        let mut observed = Deployment {
            name: data.name,
            node_id,
            network_name,
            solution_type: data.project_name,
            solution_provider: previous.as_ref().and_then(|dl| dl.solution_provider),
            contract_id,
            disks: decoded.disks,
            kv_stores: decoded.kv_stores,
            vms: decoded.vms,
            gateways: decoded.gateways,
        };
        if let Some(previous) = &previous {
            if observed.name.is_empty() {
                observed.name = previous.name.clone();
            }
            observed.match_order(previous);
        }

        debug!(
            node_id,
            contract_id,
            vms = observed.vms.len(),
            failed = decoded.failed.len(),
            "snapshot refreshed"
        );
        self.snapshots.write().await.insert(contract_id, observed);
    }

    /// Revalidate a contract: its id when still valid on the ledger, else `0`.
    pub async fn sync_contract(&self, contract_id: ContractId) -> DeployerResult<ContractId> {
        revalidate(self.ledger.as_ref(), contract_id).await
    }

    // ── Validate ──────────────────────────────────────────────────

    /// Check the account balance and the deployment's structure.
    pub async fn validate(&self, deployment: &Deployment) -> DeployerResult<()> {
        check_balance(self.ledger.as_ref(), &self.identity, self.min_balance).await?;
        deployment.validate()?;
        Ok(())
    }
}

/// Fail unless `identity` holds at least `minimum`. Unknown accounts hold nothing.
pub(crate) async fn check_balance(
    ledger: &dyn LedgerClient,
    identity: &str,
    minimum: u128,
) -> DeployerResult<()> {
    let balance = match ledger.get_balance(identity).await {
        Ok(balance) => balance,
        Err(LedgerError::AccountNotFound(_)) => 0,
        Err(e) => return Err(e.into()),
    };
    if balance < minimum {
        return Err(DeployerError::InsufficientBalance { balance, minimum });
    }
    Ok(())
}

/// `contract_id` when the ledger still holds it, else `0`.
pub(crate) async fn revalidate(
    ledger: &dyn LedgerClient,
    contract_id: ContractId,
) -> DeployerResult<ContractId> {
    if contract_id == NO_CONTRACT {
        return Ok(NO_CONTRACT);
    }
    if ledger.is_valid_contract(contract_id).await? {
        Ok(contract_id)
    } else {
        debug!(contract_id, "contract invalidated");
        Ok(NO_CONTRACT)
    }
}

fn deployment_data(deployment: &Deployment) -> DeploymentData {
    DeploymentData::new(VM_DEPLOYMENT_TYPE, &deployment.name, &deployment.solution_type)
}
