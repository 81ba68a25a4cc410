//! Persisted forms of the local state.
//!
//! Only what must survive a restart is persisted: the node → contract index
//! and per-network secret material. Snapshots and host-id bookkeeping are
//! rebuilt by sync.

use std::collections::BTreeMap;

use gridlease_core::{ContractId, NodeId};
use serde::{Deserialize, Serialize};

/// Secret material of a user network.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkData {
    pub secret_key: String,
}

/// User data stored next to the contract ids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserData {
    /// Network name → network data.
    pub networks: BTreeMap<String, NetworkData>,
}

/// Everything `StateStorage::get` returns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub contract_ids: BTreeMap<NodeId, ContractId>,
    pub user_data: UserData,
}
