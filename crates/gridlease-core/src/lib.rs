//! gridlease-core — shared types for the gridlease control plane.
//!
//! Holds the desired-state model ([`Deployment`], [`K8sCluster`]), the
//! node-facing wire model ([`WireBundle`], [`WireWorkload`]), subnet
//! arithmetic used by the IP allocator, structural validation and the TOML
//! configuration.

pub mod cluster;
pub mod config;
pub mod deployment;
pub mod subnet;
pub mod types;
pub mod validation;
pub mod wire;

pub use cluster::{K8sCluster, K8sNode};
pub use config::{ConfigError, GridConfig};
pub use deployment::*;
pub use subnet::{Subnet, SubnetError};
pub use types::*;
pub use validation::{ValidationError, ValidationResult};
pub use wire::*;
