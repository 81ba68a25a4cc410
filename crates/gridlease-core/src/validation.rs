//! Structural validation of desired deployments.
//!
//! Runs before anything reaches the grid: names, required fields and
//! per-resource limits. Read-only. Covers single-node deployments and k3s
//! clusters.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::cluster::K8sCluster;
use crate::deployment::{Deployment, Vm};
use crate::subnet::{FIRST_HOST_ID, LAST_HOST_ID};

/// Minimum VM memory accepted by nodes.
pub const MIN_VM_MEMORY_MB: u64 = 250;

/// Maximum VM vCPUs accepted by nodes.
pub const MAX_VM_CPU: u8 = 32;

static WORKLOAD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_]+$").expect("static regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("deployment name is required")]
    MissingName,

    #[error("node id is required")]
    MissingNode,

    #[error("network name is required for deployments with vms")]
    MissingNetwork,

    #[error("invalid workload name {0:?}: only letters, digits and underscores are allowed")]
    InvalidName(String),

    #[error("duplicate workload name {0:?}")]
    DuplicateName(String),

    #[error("cluster {name}: master runs on no node")]
    MissingMaster { name: String },

    #[error("vm {name}: cpu must be between 1 and {MAX_VM_CPU}, got {cpu}")]
    InvalidCpu { name: String, cpu: u8 },

    #[error("vm {name}: memory must be at least {MIN_VM_MEMORY_MB} MB, got {memory_mb}")]
    InvalidMemory { name: String, memory_mb: u64 },

    #[error("vm {name}: flist is required")]
    MissingFlist { name: String },

    #[error("vm {name}: invalid private ip {ip:?}")]
    InvalidIp { name: String, ip: String },

    #[error("{name}: private ip {ip} is already pinned by another machine")]
    DuplicateIp { name: String, ip: String },

    #[error("vm {name}: mount references unknown disk {disk}")]
    UnknownDisk { name: String, disk: String },

    #[error("{name}: size must be greater than zero")]
    ZeroSize { name: String },

    #[error("key-value store {name}: password is required")]
    MissingPassword { name: String },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

impl Deployment {
    /// Check required fields, name uniqueness and resource limits.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.node_id == 0 {
            return Err(ValidationError::MissingNode);
        }
        if !self.vms.is_empty() && self.network_name.is_empty() {
            return Err(ValidationError::MissingNetwork);
        }

        let mut seen = BTreeSet::new();
        for name in self.workload_names() {
            validate_workload_name(name)?;
            if !seen.insert(name) {
                return Err(ValidationError::DuplicateName(name.to_string()));
            }
        }

        for disk in &self.disks {
            if disk.size_gb == 0 {
                return Err(ValidationError::ZeroSize { name: disk.name.clone() });
            }
        }

        for zdb in &self.kv_stores {
            if zdb.size_gb == 0 {
                return Err(ValidationError::ZeroSize { name: zdb.name.clone() });
            }
            if zdb.password.is_empty() {
                return Err(ValidationError::MissingPassword { name: zdb.name.clone() });
            }
        }

        let disk_names: BTreeSet<&str> = self.disks.iter().map(|d| d.name.as_str()).collect();
        let mut pinned = BTreeSet::new();
        for vm in &self.vms {
            validate_vm(vm, &disk_names)?;
            if !vm.ip.is_empty() && !pinned.insert(vm.ip.as_str()) {
                return Err(ValidationError::DuplicateIp {
                    name: vm.name.clone(),
                    ip: vm.ip.clone(),
                });
            }
        }

        Ok(())
    }
}

impl K8sCluster {
    /// Check the master, the network and every machine's limits.
    ///
    /// Pinned private addresses must be unique per grid node; the disk each
    /// machine gets is named after it and checked for collisions too.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.master.name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.master.node_id == 0 {
            return Err(ValidationError::MissingMaster {
                name: self.master.name.clone(),
            });
        }
        if self.network_name.is_empty() {
            return Err(ValidationError::MissingNetwork);
        }

        let mut seen = BTreeSet::new();
        let mut pinned = BTreeSet::new();
        for node in self.nodes() {
            validate_workload_name(&node.name)?;
            let disk = format!("{}disk", node.name);
            if !seen.insert(node.name.clone()) || !seen.insert(disk) {
                return Err(ValidationError::DuplicateName(node.name.clone()));
            }
            if node.node_id == 0 {
                return Err(ValidationError::MissingNode);
            }
            if node.disk_size_gb == 0 {
                return Err(ValidationError::ZeroSize { name: node.name.clone() });
            }
            validate_machine(&node.name, &node.flist, node.cpu, node.memory_mb, &node.ip)?;
            if !node.ip.is_empty() && !pinned.insert((node.node_id, node.ip.as_str())) {
                return Err(ValidationError::DuplicateIp {
                    name: node.name.clone(),
                    ip: node.ip.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Workload names travel to the node verbatim and must be plain identifiers.
pub fn validate_workload_name(name: &str) -> ValidationResult<()> {
    if WORKLOAD_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidName(name.to_string()))
    }
}

fn validate_vm(vm: &Vm, disk_names: &BTreeSet<&str>) -> ValidationResult<()> {
    validate_machine(&vm.name, &vm.flist, vm.cpu, vm.memory_mb, &vm.ip)?;
    for mount in &vm.mounts {
        if !disk_names.contains(mount.disk_name.as_str()) {
            return Err(ValidationError::UnknownDisk {
                name: vm.name.clone(),
                disk: mount.disk_name.clone(),
            });
        }
    }
    Ok(())
}

fn validate_machine(name: &str, flist: &str, cpu: u8, memory_mb: u64, ip: &str) -> ValidationResult<()> {
    if flist.is_empty() {
        return Err(ValidationError::MissingFlist { name: name.to_string() });
    }
    if cpu == 0 || cpu > MAX_VM_CPU {
        return Err(ValidationError::InvalidCpu {
            name: name.to_string(),
            cpu,
        });
    }
    if memory_mb < MIN_VM_MEMORY_MB {
        return Err(ValidationError::InvalidMemory {
            name: name.to_string(),
            memory_mb,
        });
    }
    if !ip.is_empty() {
        let host = ip.parse::<Ipv4Addr>().map(|ip| ip.octets()[3]);
        if !matches!(host, Ok(h) if (FIRST_HOST_ID..=LAST_HOST_ID).contains(&h)) {
            return Err(ValidationError::InvalidIp {
                name: name.to_string(),
                ip: ip.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::K8sNode;
    use crate::deployment::{Disk, KvStore, Mount};

    fn valid_vm(name: &str) -> Vm {
        Vm {
            name: name.to_string(),
            flist: "https://hub.grid.tf/tf-official-apps/base:latest.flist".to_string(),
            cpu: 2,
            memory_mb: 1024,
            network_name: "net1".to_string(),
            ..Default::default()
        }
    }

    fn valid_deployment() -> Deployment {
        let mut dl = Deployment::new("web", 11, "net1");
        dl.disks.push(Disk {
            name: "data".to_string(),
            size_gb: 10,
            description: String::new(),
        });
        let mut vm = valid_vm("vm1");
        vm.mounts.push(Mount {
            disk_name: "data".to_string(),
            mount_point: "/data".to_string(),
        });
        dl.vms.push(vm);
        dl
    }

    #[test]
    fn valid_deployment_passes() {
        assert_eq!(valid_deployment().validate(), Ok(()));
    }

    #[test]
    fn missing_required_fields() {
        let mut dl = valid_deployment();
        dl.name.clear();
        assert_eq!(dl.validate(), Err(ValidationError::MissingName));

        let mut dl = valid_deployment();
        dl.node_id = 0;
        assert_eq!(dl.validate(), Err(ValidationError::MissingNode));

        let mut dl = valid_deployment();
        dl.network_name.clear();
        assert_eq!(dl.validate(), Err(ValidationError::MissingNetwork));
    }

    #[test]
    fn duplicate_names_across_kinds() {
        let mut dl = valid_deployment();
        dl.kv_stores.push(KvStore {
            name: "vm1".to_string(),
            password: "pw".to_string(),
            size_gb: 1,
            ..Default::default()
        });
        assert_eq!(
            dl.validate(),
            Err(ValidationError::DuplicateName("vm1".to_string()))
        );
    }

    #[test]
    fn rejects_bad_names() {
        let mut dl = valid_deployment();
        dl.vms[0].name = "vm-1".to_string();
        assert!(matches!(dl.validate(), Err(ValidationError::InvalidName(_))));
    }

    #[test]
    fn vm_limits() {
        let mut dl = valid_deployment();
        dl.vms[0].cpu = 0;
        assert!(matches!(dl.validate(), Err(ValidationError::InvalidCpu { .. })));

        let mut dl = valid_deployment();
        dl.vms[0].memory_mb = 128;
        assert!(matches!(dl.validate(), Err(ValidationError::InvalidMemory { .. })));

        let mut dl = valid_deployment();
        dl.vms[0].flist.clear();
        assert!(matches!(dl.validate(), Err(ValidationError::MissingFlist { .. })));
    }

    #[test]
    fn pinned_ip_must_use_host_range() {
        let mut dl = valid_deployment();
        dl.vms[0].ip = "10.1.0.5".to_string();
        assert_eq!(dl.validate(), Ok(()));

        dl.vms[0].ip = "10.1.0.1".to_string();
        assert!(matches!(dl.validate(), Err(ValidationError::InvalidIp { .. })));

        dl.vms[0].ip = "10.1.0".to_string();
        assert!(matches!(dl.validate(), Err(ValidationError::InvalidIp { .. })));
    }

    #[test]
    fn pinned_ips_are_unique() {
        let mut dl = valid_deployment();
        dl.vms[0].ip = "10.1.0.5".to_string();
        let mut other = valid_vm("vm2");
        other.ip = "10.1.0.5".to_string();
        dl.vms.push(other);
        assert_eq!(
            dl.validate(),
            Err(ValidationError::DuplicateIp {
                name: "vm2".to_string(),
                ip: "10.1.0.5".to_string(),
            })
        );

        dl.vms[1].ip = "10.1.0.6".to_string();
        assert_eq!(dl.validate(), Ok(()));
    }

    #[test]
    fn mounts_reference_known_disks() {
        let mut dl = valid_deployment();
        dl.vms[0].mounts[0].disk_name = "missing".to_string();
        assert!(matches!(dl.validate(), Err(ValidationError::UnknownDisk { .. })));
    }

    #[test]
    fn zero_sized_resources() {
        let mut dl = valid_deployment();
        dl.disks[0].size_gb = 0;
        assert!(matches!(dl.validate(), Err(ValidationError::ZeroSize { .. })));
    }

    fn machine(name: &str, node_id: u32) -> K8sNode {
        K8sNode {
            name: name.to_string(),
            node_id,
            disk_size_gb: 5,
            flist: "https://hub.grid.tf/tf-official-apps/k3s-latest.flist".to_string(),
            cpu: 2,
            memory_mb: 1024,
            ..Default::default()
        }
    }

    fn valid_cluster() -> K8sCluster {
        K8sCluster {
            master: machine("master", 11),
            workers: vec![machine("w1", 11), machine("w2", 12)],
            network_name: "k8snet".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_cluster_passes() {
        assert_eq!(valid_cluster().validate(), Ok(()));
    }

    #[test]
    fn cluster_requires_master_and_network() {
        let mut cluster = valid_cluster();
        cluster.master.node_id = 0;
        assert!(matches!(cluster.validate(), Err(ValidationError::MissingMaster { .. })));

        let mut cluster = valid_cluster();
        cluster.network_name.clear();
        assert_eq!(cluster.validate(), Err(ValidationError::MissingNetwork));
    }

    #[test]
    fn cluster_names_and_disks_do_not_collide() {
        let mut cluster = valid_cluster();
        cluster.workers[1].name = "w1".to_string();
        assert_eq!(cluster.validate(), Err(ValidationError::DuplicateName("w1".to_string())));

        let mut cluster = valid_cluster();
        cluster.workers[1].name = "w1disk".to_string();
        assert_eq!(
            cluster.validate(),
            Err(ValidationError::DuplicateName("w1disk".to_string()))
        );
    }

    #[test]
    fn cluster_pins_are_unique_per_grid_node() {
        let mut cluster = valid_cluster();
        cluster.master.ip = "10.1.2.2".to_string();
        cluster.workers[1].ip = "10.1.2.2".to_string();
        assert_eq!(cluster.validate(), Ok(()));

        cluster.workers[0].ip = "10.1.2.2".to_string();
        assert!(matches!(cluster.validate(), Err(ValidationError::DuplicateIp { .. })));
    }

    #[test]
    fn cluster_machine_limits() {
        let mut cluster = valid_cluster();
        cluster.workers[0].memory_mb = 100;
        assert!(matches!(cluster.validate(), Err(ValidationError::InvalidMemory { .. })));

        let mut cluster = valid_cluster();
        cluster.workers[0].disk_size_gb = 0;
        assert!(matches!(cluster.validate(), Err(ValidationError::ZeroSize { .. })));
    }
}
