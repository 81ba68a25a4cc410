//! In-memory collaborators for tests and local experimentation.
//!
//! [`MemoryLedger`] answers from sets held in memory and counts validity
//! queries. [`MemoryRemote`] behaves like a well-mannered grid by default
//! (new contracts per node, cancellations honored, bundles kept running) and
//! can be scripted with explicit outcomes to exercise partial failures.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use gridlease_core::{ContractId, DeploymentData, NO_CONTRACT, NodeId, WireBundle, WorkloadResult};
use tokio::sync::Mutex;
use tracing::debug;

use crate::ledger::{LedgerClient, LedgerError};
use crate::remote::{BundleMap, ContractMap, RemoteDeployer, RemoteOutcome};

// ── Ledger ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryLedger {
    valid: Mutex<BTreeSet<ContractId>>,
    balances: Mutex<BTreeMap<String, u128>>,
    validity_queries: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_balance(&self, identity: &str, balance: u128) {
        self.balances.lock().await.insert(identity.to_string(), balance);
    }

    pub async fn activate(&self, contract_id: ContractId) {
        self.valid.lock().await.insert(contract_id);
    }

    pub async fn invalidate(&self, contract_id: ContractId) {
        self.valid.lock().await.remove(&contract_id);
    }

    /// Number of `is_valid_contract` calls answered so far.
    pub fn validity_queries(&self) -> usize {
        self.validity_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn is_valid_contract(&self, contract_id: ContractId) -> Result<bool, LedgerError> {
        self.validity_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.valid.lock().await.contains(&contract_id))
    }

    async fn get_balance(&self, identity: &str) -> Result<u128, LedgerError> {
        self.balances
            .lock()
            .await
            .get(identity)
            .copied()
            .ok_or_else(|| LedgerError::AccountNotFound(identity.to_string()))
    }
}

// ── Remote deployer ───────────────────────────────────────────────

/// A call received by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Deploy {
        old: ContractMap,
        new: BundleMap,
        providers: BTreeMap<NodeId, u64>,
    },
    Cancel {
        old: ContractMap,
        new: BundleMap,
    },
    Fetch {
        contracts: ContractMap,
    },
}

#[derive(Debug)]
pub struct MemoryRemote {
    next_contract: AtomicU64,
    running: Mutex<BTreeMap<ContractId, WireBundle>>,
    deploy_script: Mutex<VecDeque<RemoteOutcome>>,
    cancel_script: Mutex<VecDeque<RemoteOutcome>>,
    calls: Mutex<Vec<RemoteCall>>,
    hang: AtomicBool,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self {
            next_contract: AtomicU64::new(1),
            running: Mutex::default(),
            deploy_script: Mutex::default(),
            cancel_script: Mutex::default(),
            calls: Mutex::default(),
            hang: AtomicBool::new(false),
        }
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `deploy` with `outcome` instead of the default behavior.
    pub async fn script_deploy(&self, outcome: RemoteOutcome) {
        self.deploy_script.lock().await.push_back(outcome);
    }

    /// Answer the next `cancel` with `outcome` instead of the default behavior.
    pub async fn script_cancel(&self, outcome: RemoteOutcome) {
        self.cancel_script.lock().await.push_back(outcome);
    }

    /// Make `deploy` and `cancel` wait forever.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Put a bundle in place as if the grid were running it.
    pub async fn set_running(&self, contract_id: ContractId, bundle: WireBundle) {
        self.running.lock().await.insert(contract_id, bundle);
    }

    pub async fn running(&self, contract_id: ContractId) -> Option<WireBundle> {
        self.running.lock().await.get(&contract_id).cloned()
    }

    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().await.clone()
    }

    async fn wait_if_hung(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

/// The bundle as a node reports it once every workload is up.
fn as_running(bundle: &WireBundle, contract_id: ContractId) -> WireBundle {
    let mut running = bundle.clone();
    running.contract_id = contract_id;
    for workload in &mut running.workloads {
        workload.result = WorkloadResult::ok(serde_json::json!({}));
    }
    running
}

#[async_trait]
impl RemoteDeployer for MemoryRemote {
    async fn deploy(
        &self,
        old: &ContractMap,
        new: &BundleMap,
        _data: &BTreeMap<NodeId, DeploymentData>,
        providers: &BTreeMap<NodeId, u64>,
    ) -> RemoteOutcome {
        self.calls.lock().await.push(RemoteCall::Deploy {
            old: old.clone(),
            new: new.clone(),
            providers: providers.clone(),
        });
        self.wait_if_hung().await;

        if let Some(outcome) = self.deploy_script.lock().await.pop_front() {
            return outcome;
        }

        let mut contracts = old.clone();
        let mut running = self.running.lock().await;
        for (node_id, bundle) in new {
            let contract_id = match old.get(node_id) {
                Some(&id) if id != NO_CONTRACT => id,
                _ => self.next_contract.fetch_add(1, Ordering::SeqCst),
            };
            debug!(node_id, contract_id, "memory remote deployed bundle");
            running.insert(contract_id, as_running(bundle, contract_id));
            contracts.insert(*node_id, contract_id);
        }
        RemoteOutcome::ok(contracts)
    }

    async fn cancel(&self, old: &ContractMap, new: &BundleMap) -> RemoteOutcome {
        self.calls.lock().await.push(RemoteCall::Cancel {
            old: old.clone(),
            new: new.clone(),
        });
        self.wait_if_hung().await;

        if let Some(outcome) = self.cancel_script.lock().await.pop_front() {
            return outcome;
        }

        let mut contracts = ContractMap::new();
        let mut running = self.running.lock().await;
        for (node_id, contract_id) in old {
            if new.contains_key(node_id) {
                contracts.insert(*node_id, *contract_id);
            } else {
                debug!(node_id, contract_id, "memory remote cancelled contract");
                running.remove(contract_id);
            }
        }
        RemoteOutcome::ok(contracts)
    }

    async fn get_deployments(&self, contracts: &ContractMap) -> anyhow::Result<BundleMap> {
        self.calls.lock().await.push(RemoteCall::Fetch {
            contracts: contracts.clone(),
        });
        let running = self.running.lock().await;
        Ok(contracts
            .iter()
            .filter_map(|(node_id, contract_id)| {
                running.get(contract_id).map(|bundle| (*node_id, bundle.clone()))
            })
            .collect())
    }
}
