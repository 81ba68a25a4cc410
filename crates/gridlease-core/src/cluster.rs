//! Container (k3s) cluster domain objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ContractId, NodeId, PrivateIp};

/// One machine of a k3s cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct K8sNode {
    pub name: String,
    pub node_id: NodeId,
    pub disk_size_gb: u64,
    pub public_ip: bool,
    pub public_ip6: bool,
    pub planetary: bool,
    pub flist: String,
    pub cpu: u8,
    pub memory_mb: u64,
    /// Private address inside the node subnet. Empty means unassigned.
    pub ip: String,
    pub computed_ip: String,
    pub computed_ip6: String,
    pub ygg_ip: String,
}

impl PrivateIp for K8sNode {
    fn private_ip(&self) -> &str {
        &self.ip
    }

    fn set_private_ip(&mut self, ip: String) {
        self.ip = ip;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct K8sCluster {
    pub master: K8sNode,
    pub workers: Vec<K8sNode>,
    pub token: String,
    pub ssh_key: String,
    pub network_name: String,
    pub solution_type: String,
    /// Contract per node hosting part of the cluster.
    pub node_deployment_ids: BTreeMap<NodeId, ContractId>,
}

impl K8sCluster {
    /// Every cluster node, master first.
    pub fn nodes(&self) -> impl Iterator<Item = &K8sNode> {
        std::iter::once(&self.master).chain(self.workers.iter())
    }

    /// Distinct grid nodes hosting the cluster, ascending.
    pub fn grid_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes().map(|n| n.node_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
