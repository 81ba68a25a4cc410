//! gridlease-deployer — reconciliation of deployments and k3s clusters.
//!
//! Drives desired [`Deployment`](gridlease_core::Deployment)s and
//! [`K8sCluster`](gridlease_core::K8sCluster)s onto the grid
//! through two external collaborators:
//!
//! - **[`LedgerClient`]** — contract validity and account balance
//! - **[`RemoteDeployer`]** — pushes, cancels and fetches node bundles
//!
//! and keeps the shared [`GridState`](gridlease_state::GridState) in step with
//! what the grid reports.
//!
//! # Architecture
//!
//! ```text
//! DeploymentDeployer
//!   ├── validate  (ledger balance + structural checks)
//!   ├── generate  (ipam → workload codecs → WireBundle per node)
//!   ├── deploy / cancel  (RemoteDeployer, commit after the response)
//!   ├── sync      (get_deployments → sync_contract → decode_bundle)
//!   └── GridState (contract index, network bookkeeping, node locks)
//!
//! ClusterDeployer
//!   └── same pipeline, one contract per grid node the cluster spans
//! ```

pub mod cluster;
pub mod deployer;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod remote;

pub use cluster::ClusterDeployer;
pub use deployer::DeploymentDeployer;
pub use error::{DeployerError, DeployerResult};
pub use ledger::{LedgerClient, LedgerError};
pub use memory::{MemoryLedger, MemoryRemote, RemoteCall};
pub use remote::{BundleMap, ContractMap, RemoteDeployer, RemoteOutcome};
