//! Node-facing wire types: bundles and the workloads inside them.
//!
//! A [`WireBundle`] is what the remote deployer pushes to a node and what it
//! hands back when asked for running deployments. The payload of each
//! [`WireWorkload`] is opaque JSON interpreted by the codec selected through
//! its [`WorkloadType`] tag.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ContractId, DeploymentData, TwinId};

/// Closed set of workload kinds a node understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    /// Virtual machine compute.
    #[serde(rename = "zmachine")]
    ZMachine,
    /// Block disk.
    #[serde(rename = "zmount")]
    ZMount,
    /// Key-value store namespace.
    Zdb,
    /// Object storage gateway.
    Qsfs,
    /// Public IPv4/IPv6 reservation consumed by a zmachine.
    Ip,
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadType::ZMachine => write!(f, "zmachine"),
            WorkloadType::ZMount => write!(f, "zmount"),
            WorkloadType::Zdb => write!(f, "zdb"),
            WorkloadType::Qsfs => write!(f, "qsfs"),
            WorkloadType::Ip => write!(f, "ip"),
        }
    }
}

/// State a node reports for a single workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultState {
    #[default]
    Init,
    Ok,
    Error,
    Paused,
    Deleted,
}

impl ResultState {
    pub fn is_okay(&self) -> bool {
        matches!(self, ResultState::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkloadResult {
    pub created: u64,
    pub state: ResultState,
    pub error: String,
    /// Kind-specific result payload (computed addresses, endpoints).
    pub data: serde_json::Value,
}

impl WorkloadResult {
    /// A successful result carrying `data`.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            state: ResultState::Ok,
            data,
            ..Default::default()
        }
    }
}

/// One entry inside a [`WireBundle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireWorkload {
    pub version: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WorkloadType,
    pub data: serde_json::Value,
    pub metadata: String,
    pub description: String,
    #[serde(default)]
    pub result: WorkloadResult,
}

impl WireWorkload {
    pub fn new(name: &str, kind: WorkloadType, data: serde_json::Value, description: &str) -> Self {
        Self {
            version: 0,
            name: name.to_string(),
            kind,
            data,
            metadata: String::new(),
            description: description.to_string(),
            result: WorkloadResult::default(),
        }
    }

    pub fn with_result(mut self, result: WorkloadResult) -> Self {
        self.result = result;
        self
    }
}

/// Node-addressed collection of workloads plus metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireBundle {
    pub version: u32,
    pub twin_id: TwinId,
    pub contract_id: ContractId,
    /// JSON-encoded [`DeploymentData`].
    pub metadata: String,
    pub description: String,
    pub workloads: Vec<WireWorkload>,
}

impl WireBundle {
    pub fn new(twin_id: TwinId, workloads: Vec<WireWorkload>) -> Self {
        Self {
            twin_id,
            workloads,
            ..Default::default()
        }
    }

    /// Look up a workload by name.
    pub fn get(&self, name: &str) -> Option<&WireWorkload> {
        self.workloads.iter().find(|w| w.name == name)
    }

    pub fn deployment_data(&self) -> Option<DeploymentData> {
        if self.metadata.is_empty() {
            return None;
        }
        DeploymentData::from_json(&self.metadata).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn workload_type_tags() {
        assert_eq!(serde_json::to_string(&WorkloadType::ZMachine).unwrap(), "\"zmachine\"");
        assert_eq!(serde_json::to_string(&WorkloadType::ZMount).unwrap(), "\"zmount\"");
        assert_eq!(serde_json::to_string(&WorkloadType::Zdb).unwrap(), "\"zdb\"");
        assert_eq!(WorkloadType::Qsfs.to_string(), "qsfs");
    }

    #[test]
    fn new_workload_is_not_okay() {
        let w = WireWorkload::new("disk1", WorkloadType::ZMount, json!({"size": 1}), "");
        assert!(!w.result.state.is_okay());
        let w = w.with_result(WorkloadResult::ok(json!({})));
        assert!(w.result.state.is_okay());
    }

    #[test]
    fn bundle_lookup_and_metadata() {
        let mut bundle = WireBundle::new(
            7,
            vec![WireWorkload::new("vm1", WorkloadType::ZMachine, json!({}), "")],
        );
        assert!(bundle.get("vm1").is_some());
        assert!(bundle.get("vm2").is_none());
        assert!(bundle.deployment_data().is_none());

        bundle.metadata = DeploymentData::new("vm", "web", "Virtual Machine")
            .to_json()
            .unwrap();
        assert_eq!(bundle.deployment_data().unwrap().name, "web");
    }
}
