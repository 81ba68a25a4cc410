//! gridlease-state — local state of the gridlease control plane.
//!
//! Provides the process-wide caches the reconciliation engine works against
//! and the durable boundary they are loaded from and checkpointed to:
//!
//! - **`contracts`** — node → contract index of live leases
//! - **`network`** — node subnets and per-contract host-id pools
//! - **`locks`** — per-key async locks (per node, per network)
//! - **`grid`** — [`GridState`], the bundle shared by all deployers
//! - **`store`** — [`StateStorage`] and its redb-backed [`StateStore`]
//!
//! # Architecture
//!
//! Only the contract index and per-network user data are persisted. Host-id
//! bookkeeping and deployment snapshots are rebuilt from the grid by sync.

pub mod contracts;
pub mod error;
pub mod grid;
pub mod locks;
pub mod network;
pub mod store;
pub mod tables;
pub mod types;

pub use contracts::ContractIndex;
pub use error::{StateError, StateResult};
pub use grid::GridState;
pub use locks::KeyedLocks;
pub use network::{Network, NetworkState};
pub use store::{StateStorage, StateStore};
pub use types::*;
