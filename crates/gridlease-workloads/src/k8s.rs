//! k3s clusters: one disk, an optional public IP and a zmachine per cluster node.
//!
//! Workers find the master through `K3S_URL`, which points at the master's
//! private address; the master is the only machine without it. Private
//! addresses must be assigned before encoding.

use std::collections::BTreeMap;

use gridlease_core::{
    Disk, K8sCluster, K8sNode, NodeId, WireBundle, WireWorkload, WorkloadType, NO_CONTRACT,
};
use tracing::warn;

use crate::codec::{MIB, WorkloadCodec, expect_kind, payload, result_data, to_bytes, to_data};
use crate::error::{CodecError, CodecResult};
use crate::vm::{
    ComputeCapacity, MachineMount, MachineNetwork, NetworkInterface, ZMachineData, ZMachineResult,
    decode_public_ip, encode_public_ip, primary_interface,
};

pub const K3S_TOKEN: &str = "K3S_TOKEN";
pub const K3S_URL: &str = "K3S_URL";
pub const SSH_KEY: &str = "SSH_KEY";

const K3S_API_PORT: u16 = 6443;
const DATA_DIR: &str = "/mnt/data";
const ENTRYPOINT: &str = "/sbin/zinit init";

/// Name of the data disk attached to cluster machine `name`.
pub fn disk_name(name: &str) -> String {
    format!("{name}disk")
}

/// Encode and decode whole clusters across the grid nodes hosting them.
pub trait ClusterCodec: Sized {
    /// Wire workloads per grid node.
    fn encode_nodes(&self) -> CodecResult<BTreeMap<NodeId, Vec<WireWorkload>>>;

    /// Reassemble a cluster from the bundles running on its grid nodes.
    fn from_bundles(bundles: &BTreeMap<NodeId, WireBundle>) -> CodecResult<Self>;
}

impl ClusterCodec for K8sCluster {
    fn encode_nodes(&self) -> CodecResult<BTreeMap<NodeId, Vec<WireWorkload>>> {
        let master_ip = primary_interface(
            &self.master.name,
            &MachineNetwork {
                interfaces: vec![NetworkInterface {
                    network: self.network_name.clone(),
                    ip: self.master.ip.clone(),
                }],
                ..Default::default()
            },
        )?
        .ip
        .clone();
        let master_url = format!("https://{master_ip}:{K3S_API_PORT}");

        let mut per_node: BTreeMap<NodeId, Vec<WireWorkload>> = BTreeMap::new();
        per_node
            .entry(self.master.node_id)
            .or_default()
            .extend(encode_machine(self, &self.master, None)?);
        for worker in &self.workers {
            per_node
                .entry(worker.node_id)
                .or_default()
                .extend(encode_machine(self, worker, Some(&master_url))?);
        }
        Ok(per_node)
    }

    fn from_bundles(bundles: &BTreeMap<NodeId, WireBundle>) -> CodecResult<Self> {
        let mut cluster = K8sCluster::default();
        let mut master = None;

        for (node_id, bundle) in bundles {
            if bundle.contract_id != NO_CONTRACT {
                cluster.node_deployment_ids.insert(*node_id, bundle.contract_id);
            }
            if cluster.solution_type.is_empty() {
                if let Some(data) = bundle.deployment_data() {
                    cluster.solution_type = data.project_name;
                }
            }

            for workload in &bundle.workloads {
                if workload.kind != WorkloadType::ZMachine || !workload.result.state.is_okay() {
                    continue;
                }
                let decoded = match decode_machine(workload, bundle, *node_id) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!(node_id, workload = %workload.name, error = %e, "skipping cluster machine");
                        continue;
                    }
                };
                cluster.network_name = decoded.network;
                cluster.token = decoded.env.get(K3S_TOKEN).cloned().unwrap_or_default();
                cluster.ssh_key = decoded.env.get(SSH_KEY).cloned().unwrap_or_default();

                if decoded.env.contains_key(K3S_URL) {
                    cluster.workers.push(decoded.node);
                } else if master.is_none() {
                    master = Some(decoded.node);
                } else {
                    warn!(node_id, workload = %workload.name, "second cluster master ignored");
                }
            }
        }

        cluster.master = master.ok_or(CodecError::MissingMaster)?;
        Ok(cluster)
    }
}

fn encode_machine(
    cluster: &K8sCluster,
    node: &K8sNode,
    master_url: Option<&str>,
) -> CodecResult<Vec<WireWorkload>> {
    let disk = Disk {
        name: disk_name(&node.name),
        size_gb: node.disk_size_gb,
        description: String::new(),
    };
    let mut workloads = disk.encode()?;

    let public_ip = match encode_public_ip(&node.name, node.public_ip, node.public_ip6)? {
        Some(ip_workload) => {
            let name = ip_workload.name.clone();
            workloads.push(ip_workload);
            name
        }
        None => String::new(),
    };

    let mut env = BTreeMap::from([
        (SSH_KEY.to_string(), cluster.ssh_key.clone()),
        (K3S_TOKEN.to_string(), cluster.token.clone()),
        ("K3S_DATA_DIR".to_string(), DATA_DIR.to_string()),
        ("K3S_FLANNEL_IFACE".to_string(), "eth0".to_string()),
        ("K3S_NODE_NAME".to_string(), node.name.clone()),
    ]);
    if let Some(url) = master_url {
        env.insert(K3S_URL.to_string(), url.to_string());
    }

    let data = ZMachineData {
        flist: node.flist.clone(),
        network: MachineNetwork {
            public_ip,
            planetary: node.planetary,
            interfaces: vec![NetworkInterface {
                network: cluster.network_name.clone(),
                ip: node.ip.clone(),
            }],
        },
        size: 0,
        compute_capacity: ComputeCapacity {
            cpu: node.cpu,
            memory: to_bytes(&node.name, node.memory_mb, MIB)?,
        },
        mounts: vec![MachineMount {
            name: disk.name.clone(),
            mountpoint: DATA_DIR.to_string(),
        }],
        entrypoint: ENTRYPOINT.to_string(),
        env,
        corex: false,
    };
    let data = to_data(&node.name, &data)?;
    workloads.push(WireWorkload::new(&node.name, WorkloadType::ZMachine, data, ""));
    Ok(workloads)
}

struct DecodedMachine {
    node: K8sNode,
    network: String,
    env: BTreeMap<String, String>,
}

fn decode_machine(
    workload: &WireWorkload,
    bundle: &WireBundle,
    node_id: NodeId,
) -> CodecResult<DecodedMachine> {
    expect_kind(workload, WorkloadType::ZMachine)?;
    let data: ZMachineData = payload(workload)?;
    let result: ZMachineResult = result_data(workload)?;
    let interface = primary_interface(&workload.name, &data.network)?;
    let public = decode_public_ip(&workload.name, &data.network, bundle)?;

    let disk_size_gb = match data.mounts.first() {
        Some(mount) => {
            let disk = bundle
                .get(&mount.name)
                .ok_or_else(|| CodecError::MissingWorkload {
                    name: workload.name.clone(),
                    missing: mount.name.clone(),
                })?;
            Disk::decode(disk, bundle)?.size_gb
        }
        None => 0,
    };

    Ok(DecodedMachine {
        node: K8sNode {
            name: workload.name.clone(),
            node_id,
            disk_size_gb,
            public_ip: public.v4,
            public_ip6: public.v6,
            planetary: data.network.planetary,
            flist: data.flist,
            cpu: data.compute_capacity.cpu,
            memory_mb: data.compute_capacity.memory / MIB,
            ip: interface.ip.clone(),
            computed_ip: public.computed_ip,
            computed_ip6: public.computed_ip6,
            ygg_ip: result.ygg_ip,
        },
        network: interface.network.clone(),
        env: data.env,
    })
}
