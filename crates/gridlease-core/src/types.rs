//! Identifiers and metadata shared across gridlease crates.

use serde::{Deserialize, Serialize};

/// Grid node identifier.
pub type NodeId = u32;

/// On-chain contract (lease) identifier. `0` means "no lease".
pub type ContractId = u64;

/// On-chain identity owning deployments.
pub type TwinId = u32;

/// Placeholder contract id for a deployment the grid has not accepted.
pub const NO_CONTRACT: ContractId = 0;

/// Bundle type tag for single-node deployments.
pub const VM_DEPLOYMENT_TYPE: &str = "vm";

/// Bundle type tag for container clusters.
pub const K8S_DEPLOYMENT_TYPE: &str = "kubernetes";

/// Solution type applied when the caller leaves it empty.
pub const DEFAULT_SOLUTION_TYPE: &str = "Virtual Machine";

/// Solution type applied to clusters when the caller leaves it empty.
pub const DEFAULT_CLUSTER_SOLUTION_TYPE: &str = "Kubernetes";

/// Metadata attached to every bundle and handed to the remote deployer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentData {
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(rename = "projectName")]
    pub project_name: String,
}

impl DeploymentData {
    pub fn new(kind: &str, name: &str, project_name: &str) -> Self {
        Self {
            version: 0,
            kind: kind.to_string(),
            name: name.to_string(),
            project_name: project_name.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// A resource that holds a private address inside a node subnet.
///
/// Implemented by everything the IP allocator can place: VMs and container
/// cluster nodes. An empty string means unassigned.
pub trait PrivateIp {
    fn private_ip(&self) -> &str;
    fn set_private_ip(&mut self, ip: String);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_data_field_names() {
        let data = DeploymentData::new(VM_DEPLOYMENT_TYPE, "web", "Virtual Machine");
        let json = data.to_json().unwrap();
        assert!(json.contains("\"type\":\"vm\""));
        assert!(json.contains("\"projectName\":\"Virtual Machine\""));
        assert_eq!(DeploymentData::from_json(&json).unwrap(), data);
    }
}
