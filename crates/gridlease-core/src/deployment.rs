//! Desired-state domain objects for a single-node deployment.
//!
//! A [`Deployment`] is what a caller declares for one node: disks, key-value
//! stores, VMs and object gateways. The same shape is reused for the
//! last-observed state rebuilt by sync.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ContractId, NodeId, PrivateIp};

/// One user-declared unit targeting a single node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    pub node_id: NodeId,
    pub network_name: String,
    pub solution_type: String,
    /// Optional revenue-share beneficiary.
    pub solution_provider: Option<u64>,
    /// `0` until the grid accepted the deployment.
    pub contract_id: ContractId,
    pub disks: Vec<Disk>,
    pub kv_stores: Vec<KvStore>,
    pub vms: Vec<Vm>,
    pub gateways: Vec<ObjectGateway>,
}

impl Deployment {
    pub fn new(name: &str, node_id: NodeId, network_name: &str) -> Self {
        Self {
            name: name.to_string(),
            node_id,
            network_name: network_name.to_string(),
            ..Default::default()
        }
    }

    /// Host ids (last octets) of every VM with a parseable private IP.
    pub fn vm_host_ids(&self) -> Vec<u8> {
        self.vms
            .iter()
            .filter_map(|vm| crate::subnet::host_id(&vm.ip))
            .collect()
    }

    /// Every workload-level name declared by this deployment, in encode order.
    pub fn workload_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        names.extend(self.disks.iter().map(|d| d.name.as_str()));
        names.extend(self.kv_stores.iter().map(|z| z.name.as_str()));
        names.extend(self.vms.iter().map(|v| v.name.as_str()));
        names.extend(self.gateways.iter().map(|q| q.name.as_str()));
        names
    }

    /// Reorder this deployment's resources to follow the order of `previous`.
    ///
    /// Names unknown to `previous` keep their relative order after the known
    /// ones.
    pub fn match_order(&mut self, previous: &Deployment) {
        sort_like(&mut self.disks, &previous.disks, |d| &d.name);
        sort_like(&mut self.kv_stores, &previous.kv_stores, |z| &z.name);
        sort_like(&mut self.vms, &previous.vms, |v| &v.name);
        sort_like(&mut self.gateways, &previous.gateways, |q| &q.name);
    }
}

fn sort_like<T>(items: &mut [T], reference: &[T], name: impl Fn(&T) -> &String) {
    let positions: BTreeMap<&str, usize> = reference
        .iter()
        .enumerate()
        .map(|(idx, item)| (name(item).as_str(), idx))
        .collect();
    // Stable sort keeps unknown names in decode order.
    items.sort_by_key(|item| {
        positions
            .get(name(item).as_str())
            .copied()
            .unwrap_or(usize::MAX)
    });
}

// ── Disk ──────────────────────────────────────────────────────────

/// Block storage mounted into VMs of the same deployment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub size_gb: u64,
    pub description: String,
}

// ── Key-value store ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvMode {
    #[default]
    User,
    Seq,
}

/// A key-value store namespace (zdb) reserved on the node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KvStore {
    pub name: String,
    pub password: String,
    pub public: bool,
    pub size_gb: u64,
    pub description: String,
    pub mode: KvMode,
    /// Reported by the node once running.
    pub ips: Vec<String>,
    pub port: u32,
    pub namespace: String,
}

// ── Virtual machine ───────────────────────────────────────────────

/// Disk attachment inside a VM.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mount {
    pub disk_name: String,
    pub mount_point: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vm {
    pub name: String,
    pub flist: String,
    pub public_ip: bool,
    pub public_ip6: bool,
    pub planetary: bool,
    pub corex: bool,
    /// Private address inside the node subnet. Empty means unassigned.
    pub ip: String,
    pub description: String,
    pub cpu: u8,
    pub memory_mb: u64,
    pub rootfs_size_gb: u64,
    pub entrypoint: String,
    pub mounts: Vec<Mount>,
    pub env_vars: BTreeMap<String, String>,
    pub network_name: String,
    /// Public IPv4 reported by the node.
    pub computed_ip: String,
    /// Public IPv6 reported by the node.
    pub computed_ip6: String,
    /// Planetary network address reported by the node.
    pub ygg_ip: String,
}

impl PrivateIp for Vm {
    fn private_ip(&self) -> &str {
        &self.ip
    }

    fn set_private_ip(&mut self, ip: String) {
        self.ip = ip;
    }
}

// ── Object gateway ────────────────────────────────────────────────

/// A storage backend (zdb namespace) used by an object gateway.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Backend {
    pub address: String,
    pub namespace: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendGroup {
    pub backends: Vec<Backend>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GatewayMetadata {
    pub kind: String,
    pub prefix: String,
    pub encryption_key: String,
    pub backends: Vec<Backend>,
}

/// Erasure-coded object storage gateway spread over zdb backends.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectGateway {
    pub name: String,
    pub description: String,
    pub cache_size_mb: u64,
    pub minimal_shards: u32,
    pub expected_shards: u32,
    pub redundant_groups: u32,
    pub redundant_nodes: u32,
    pub max_zdb_data_dir_size: u32,
    /// Hex-encoded 32 byte key.
    pub encryption_key: String,
    pub compression: String,
    pub metadata: GatewayMetadata,
    pub groups: Vec<BackendGroup>,
    /// Reported by the node once running.
    pub metrics_endpoint: String,
}
