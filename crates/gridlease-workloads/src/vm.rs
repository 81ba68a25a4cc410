//! Virtual machines: a `zmachine` plus an optional public `ip` reservation.
//!
//! A VM asking for a public IPv4 or IPv6 expands to two workloads: an `ip`
//! workload named `<vm>ip` and the `zmachine` that references it by name.
//! Decoding a zmachine therefore needs the surrounding bundle.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use gridlease_core::{Mount, Vm, WireBundle, WireWorkload, WorkloadType};
use serde::{Deserialize, Serialize};

use crate::codec::{
    GIB, MIB, WorkloadCodec, expect_kind, payload, result_data, to_bytes, to_data,
};
use crate::error::{CodecError, CodecResult};

// ── Payloads ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub network: String,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineNetwork {
    /// Name of the `ip` workload in the same bundle, empty for none.
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub planetary: bool,
    pub interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComputeCapacity {
    pub cpu: u8,
    /// Memory in bytes.
    pub memory: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineMount {
    pub name: String,
    pub mountpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZMachineData {
    pub flist: String,
    pub network: MachineNetwork,
    /// Root filesystem size in bytes.
    #[serde(default)]
    pub size: u64,
    pub compute_capacity: ComputeCapacity,
    #[serde(default)]
    pub mounts: Vec<MachineMount>,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub corex: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZMachineResult {
    pub id: String,
    pub ip: String,
    pub ygg_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublicIpData {
    pub v4: bool,
    pub v6: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicIpResult {
    /// IPv4 in CIDR notation.
    pub ip: String,
    /// IPv6 in CIDR notation.
    pub ip6: String,
    pub gateway: String,
}

/// Public addresses of a machine, decoded from its `ip` workload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublicAddresses {
    pub v4: bool,
    pub v6: bool,
    pub computed_ip: String,
    pub computed_ip6: String,
}

/// Name of the `ip` workload attached to machine `name`.
pub fn public_ip_name(name: &str) -> String {
    format!("{name}ip")
}

/// The `ip` workload for a machine, if it asks for any public address.
pub(crate) fn encode_public_ip(name: &str, v4: bool, v6: bool) -> CodecResult<Option<WireWorkload>> {
    if !v4 && !v6 {
        return Ok(None);
    }
    let ip_name = public_ip_name(name);
    let data = to_data(&ip_name, &PublicIpData { v4, v6 })?;
    Ok(Some(WireWorkload::new(&ip_name, WorkloadType::Ip, data, "")))
}

/// Resolve the public addresses referenced by a decoded machine.
pub(crate) fn decode_public_ip(
    name: &str,
    network: &MachineNetwork,
    bundle: &WireBundle,
) -> CodecResult<PublicAddresses> {
    if network.public_ip.is_empty() {
        return Ok(PublicAddresses::default());
    }
    let ip_workload = bundle
        .get(&network.public_ip)
        .ok_or_else(|| CodecError::MissingWorkload {
            name: name.to_string(),
            missing: network.public_ip.clone(),
        })?;
    expect_kind(ip_workload, WorkloadType::Ip)?;
    let data: PublicIpData = payload(ip_workload)?;
    let result: PublicIpResult = result_data(ip_workload)?;
    Ok(PublicAddresses {
        v4: data.v4,
        v6: data.v6,
        computed_ip: result.ip,
        computed_ip6: result.ip6,
    })
}

/// The first interface of a machine, with its private IP checked.
pub(crate) fn primary_interface<'a>(
    name: &str,
    network: &'a MachineNetwork,
) -> CodecResult<&'a NetworkInterface> {
    let interface = network
        .interfaces
        .first()
        .ok_or_else(|| CodecError::MissingInterface { name: name.to_string() })?;
    if interface.ip.parse::<Ipv4Addr>().is_err() {
        return Err(CodecError::InvalidIp {
            name: name.to_string(),
            ip: interface.ip.clone(),
        });
    }
    Ok(interface)
}

// ── Codec ─────────────────────────────────────────────────────────

impl WorkloadCodec for Vm {
    const KIND: WorkloadType = WorkloadType::ZMachine;

    fn encode(&self) -> CodecResult<Vec<WireWorkload>> {
        let mut workloads = Vec::with_capacity(2);
        let public_ip = match encode_public_ip(&self.name, self.public_ip, self.public_ip6)? {
            Some(ip_workload) => {
                let name = ip_workload.name.clone();
                workloads.push(ip_workload);
                name
            }
            None => String::new(),
        };

        let data = ZMachineData {
            flist: self.flist.clone(),
            network: MachineNetwork {
                public_ip,
                planetary: self.planetary,
                interfaces: vec![NetworkInterface {
                    network: self.network_name.clone(),
                    ip: self.ip.clone(),
                }],
            },
            size: to_bytes(&self.name, self.rootfs_size_gb, GIB)?,
            compute_capacity: ComputeCapacity {
                cpu: self.cpu,
                memory: to_bytes(&self.name, self.memory_mb, MIB)?,
            },
            mounts: self
                .mounts
                .iter()
                .map(|m| MachineMount {
                    name: m.disk_name.clone(),
                    mountpoint: m.mount_point.clone(),
                })
                .collect(),
            entrypoint: self.entrypoint.clone(),
            env: self.env_vars.clone(),
            corex: self.corex,
        };
        let data = to_data(&self.name, &data)?;
        workloads.push(WireWorkload::new(&self.name, Self::KIND, data, &self.description));
        Ok(workloads)
    }

    fn decode(workload: &WireWorkload, bundle: &WireBundle) -> CodecResult<Self> {
        expect_kind(workload, Self::KIND)?;
        let data: ZMachineData = payload(workload)?;
        let result: ZMachineResult = result_data(workload)?;
        let interface = primary_interface(&workload.name, &data.network)?;
        let public = decode_public_ip(&workload.name, &data.network, bundle)?;

        Ok(Vm {
            name: workload.name.clone(),
            flist: data.flist,
            public_ip: public.v4,
            public_ip6: public.v6,
            planetary: data.network.planetary,
            corex: data.corex,
            ip: interface.ip.clone(),
            description: workload.description.clone(),
            cpu: data.compute_capacity.cpu,
            memory_mb: data.compute_capacity.memory / MIB,
            rootfs_size_gb: data.size / GIB,
            entrypoint: data.entrypoint,
            mounts: data
                .mounts
                .into_iter()
                .map(|m| Mount {
                    disk_name: m.name,
                    mount_point: m.mountpoint,
                })
                .collect(),
            env_vars: data.env,
            network_name: interface.network.clone(),
            computed_ip: public.computed_ip,
            computed_ip6: public.computed_ip6,
            ygg_ip: result.ygg_ip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlease_core::WorkloadResult;
    use serde_json::json;

    fn test_vm() -> Vm {
        Vm {
            name: "web".into(),
            flist: "https://hub.grid.tf/tf-official-apps/base:latest.flist".into(),
            ip: "10.1.0.2".into(),
            cpu: 2,
            memory_mb: 2048,
            rootfs_size_gb: 5,
            entrypoint: "/sbin/zinit init".into(),
            planetary: true,
            network_name: "net1".into(),
            mounts: vec![Mount {
                disk_name: "data".into(),
                mount_point: "/data".into(),
            }],
            env_vars: BTreeMap::from([("SSH_KEY".to_string(), "ssh-ed25519 AAA".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn oversized_memory_or_rootfs_is_rejected() {
        let mut vm = test_vm();
        vm.memory_mb = u64::MAX / 2;
        assert!(matches!(vm.encode(), Err(CodecError::SizeOverflow { .. })));

        let mut vm = test_vm();
        vm.rootfs_size_gb = u64::MAX / 1024;
        assert!(matches!(vm.encode(), Err(CodecError::SizeOverflow { .. })));
    }

    #[test]
    fn private_only_vm_is_single_workload() {
        let workloads = test_vm().encode().unwrap();
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].kind, WorkloadType::ZMachine);
        assert_eq!(workloads[0].data["network"]["public_ip"], "");
        assert_eq!(workloads[0].data["network"]["interfaces"][0]["ip"], "10.1.0.2");
        assert_eq!(workloads[0].data["compute_capacity"]["memory"], 2048 * MIB);
    }

    #[test]
    fn public_ip_expands_to_ip_workload_first() {
        let mut vm = test_vm();
        vm.public_ip = true;
        let workloads = vm.encode().unwrap();
        assert_eq!(workloads.len(), 2);
        assert_eq!(workloads[0].name, "webip");
        assert_eq!(workloads[0].kind, WorkloadType::Ip);
        assert_eq!(workloads[0].data, json!({ "v4": true, "v6": false }));
        assert_eq!(workloads[1].data["network"]["public_ip"], "webip");
    }

    #[test]
    fn decode_reads_computed_addresses() {
        let mut vm = test_vm();
        vm.public_ip = true;
        let mut workloads = vm.encode().unwrap();
        workloads[0].result = WorkloadResult::ok(json!({ "ip": "185.1.2.3/24", "ip6": "" }));
        workloads[1].result = WorkloadResult::ok(json!({ "id": "x", "ip": "10.1.0.2", "ygg_ip": "300::1" }));
        let bundle = WireBundle::new(1, workloads);

        let decoded = Vm::decode(&bundle.workloads[1], &bundle).unwrap();
        assert_eq!(decoded.computed_ip, "185.1.2.3/24");
        assert_eq!(decoded.ygg_ip, "300::1");

        let mut expected = vm;
        expected.computed_ip = "185.1.2.3/24".into();
        expected.ygg_ip = "300::1".into();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn decode_requires_referenced_ip_workload() {
        let mut vm = test_vm();
        vm.public_ip6 = true;
        let workloads = vm.encode().unwrap();
        let bundle = WireBundle::new(1, vec![workloads[1].clone()]);

        let err = Vm::decode(&bundle.workloads[0], &bundle).unwrap_err();
        assert!(matches!(err, CodecError::MissingWorkload { missing, .. } if missing == "webip"));
    }

    #[test]
    fn decode_rejects_unparseable_private_ip() {
        let mut vm = test_vm();
        vm.ip = "not-an-ip".into();
        let workloads = vm.encode().unwrap();
        let bundle = WireBundle::new(1, workloads);

        let err = Vm::decode(&bundle.workloads[0], &bundle).unwrap_err();
        assert!(matches!(err, CodecError::InvalidIp { .. }));
    }
}
