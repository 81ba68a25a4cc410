//! StateStore — redb-backed persistence for the contract index and user data.
//!
//! Implements [`StateStorage`], the load-at-start / save-at-checkpoint
//! boundary of the engine. Contract ids live in a `u32 → u64` table; network
//! data is JSON-serialized into `&[u8]` value columns. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use gridlease_core::{ContractId, NodeId};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Durable form of the local contract index plus per-network user data.
pub trait StateStorage: Send + Sync {
    /// Return the stored state.
    fn get(&self) -> StateResult<PersistedState>;

    /// Replace the stored state with the given contract ids and user data.
    fn set(
        &self,
        contract_ids: &BTreeMap<NodeId, ContractId>,
        user_data: &UserData,
    ) -> StateResult<()>;
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CONTRACTS).map_err(map_err!(Table))?;
        txn.open_table(NETWORKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn read_contracts(&self) -> StateResult<BTreeMap<NodeId, ContractId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONTRACTS).map_err(map_err!(Table))?;
        let mut contracts = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (node_id, contract_id) = entry.map_err(map_err!(Read))?;
            contracts.insert(node_id.value(), contract_id.value());
        }
        Ok(contracts)
    }

    fn read_networks(&self) -> StateResult<BTreeMap<String, NetworkData>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
        let mut networks = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (name, value) = entry.map_err(map_err!(Read))?;
            let data: NetworkData =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            networks.insert(name.value().to_string(), data);
        }
        Ok(networks)
    }
}

impl StateStorage for StateStore {
    fn get(&self) -> StateResult<PersistedState> {
        Ok(PersistedState {
            contract_ids: self.read_contracts()?,
            user_data: UserData {
                networks: self.read_networks()?,
            },
        })
    }

    fn set(
        &self,
        contract_ids: &BTreeMap<NodeId, ContractId>,
        user_data: &UserData,
    ) -> StateResult<()> {
        let mut encoded = Vec::with_capacity(user_data.networks.len());
        for (name, data) in &user_data.networks {
            let value = serde_json::to_vec(data).map_err(map_err!(Serialize))?;
            encoded.push((name.as_str(), value));
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CONTRACTS).map_err(map_err!(Table))?;
            let mut stale: Vec<NodeId> = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (node_id, _) = entry.map_err(map_err!(Read))?;
                stale.push(node_id.value());
            }
            for node_id in stale {
                table.remove(node_id).map_err(map_err!(Write))?;
            }
            for (node_id, contract_id) in contract_ids {
                table
                    .insert(*node_id, *contract_id)
                    .map_err(map_err!(Write))?;
            }
        }
        {
            let mut table = txn.open_table(NETWORKS).map_err(map_err!(Table))?;
            let mut stale: Vec<String> = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (name, _) = entry.map_err(map_err!(Read))?;
                stale.push(name.value().to_string());
            }
            for name in &stale {
                table.remove(name.as_str()).map_err(map_err!(Write))?;
            }
            for (name, value) in &encoded {
                table
                    .insert(*name, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            contracts = contract_ids.len(),
            networks = user_data.networks.len(),
            "state stored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user_data(names: &[&str]) -> UserData {
        UserData {
            networks: names
                .iter()
                .map(|name| {
                    (
                        name.to_string(),
                        NetworkData {
                            secret_key: format!("{name}-key"),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn empty_store_returns_default_state() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.get().unwrap(), PersistedState::default());
    }

    #[test]
    fn set_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let contracts = BTreeMap::from([(11, 100), (12, 200)]);
        let user_data = test_user_data(&["net1"]);

        store.set(&contracts, &user_data).unwrap();
        let state = store.get().unwrap();

        assert_eq!(state.contract_ids, contracts);
        assert_eq!(state.user_data, user_data);
    }

    #[test]
    fn set_replaces_previous_state() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .set(&BTreeMap::from([(11, 100), (12, 200)]), &test_user_data(&["net1", "net2"]))
            .unwrap();
        store
            .set(&BTreeMap::from([(12, 201)]), &test_user_data(&["net2"]))
            .unwrap();

        let state = store.get().unwrap();
        assert_eq!(state.contract_ids, BTreeMap::from([(12, 201)]));
        assert_eq!(state.user_data.networks.len(), 1);
        assert!(state.user_data.networks.contains_key("net2"));
    }

    #[test]
    fn set_empty_state_clears_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            let contracts: BTreeMap<NodeId, ContractId> =
                (1..=64).map(|node_id| (node_id, u64::from(node_id) * 10)).collect();
            store.set(&contracts, &test_user_data(&["net1", "net2"])).unwrap();
            store.set(&BTreeMap::new(), &UserData::default()).unwrap();
        }

        // A cancelled contract must not come back on the next load.
        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.get().unwrap(), PersistedState::default());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .set(&BTreeMap::from([(11, 100)]), &test_user_data(&["net1"]))
                .unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let state = store.get().unwrap();
        assert_eq!(state.contract_ids.get(&11), Some(&100));
        assert_eq!(state.user_data.networks["net1"].secret_key, "net1-key");
    }
}
