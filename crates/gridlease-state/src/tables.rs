//! redb table definitions for the persisted gridlease state.

use redb::TableDefinition;

/// Contract id per node, keyed by node id.
pub const CONTRACTS: TableDefinition<u32, u64> = TableDefinition::new("contracts");

/// Per-network user data (JSON-serialized `NetworkData`), keyed by network name.
pub const NETWORKS: TableDefinition<&str, &[u8]> = TableDefinition::new("networks");
