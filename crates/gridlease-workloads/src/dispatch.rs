//! Type-tag dispatch over whole bundles and deployments.

use gridlease_core::{
    Deployment, Disk, KvStore, ObjectGateway, Vm, WireBundle, WireWorkload, WorkloadType,
};
use tracing::{debug, warn};

use crate::codec::WorkloadCodec;
use crate::error::{CodecError, CodecResult};

/// Typed resources recovered from a running bundle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBundle {
    pub disks: Vec<Disk>,
    pub kv_stores: Vec<KvStore>,
    pub vms: Vec<Vm>,
    pub gateways: Vec<ObjectGateway>,
    /// Names of `ok` workloads whose payload could not be decoded.
    pub failed: Vec<String>,
}

impl DecodedBundle {
    /// Host ids of the successfully decoded VMs.
    pub fn vm_host_ids(&self) -> Vec<u8> {
        self.vms
            .iter()
            .filter_map(|vm| gridlease_core::subnet::host_id(&vm.ip))
            .collect()
    }
}

/// Decode every `ok` workload of `bundle` by its type tag.
///
/// Workloads that are not `ok` are ignored. A workload that fails to decode
/// is logged and recorded in [`DecodedBundle::failed`]; the rest of the bundle
/// is still decoded. `ip` workloads are only read through the machine that
/// references them.
pub fn decode_bundle(bundle: &WireBundle) -> DecodedBundle {
    let mut decoded = DecodedBundle::default();
    for workload in &bundle.workloads {
        if !workload.result.state.is_okay() {
            debug!(
                contract_id = bundle.contract_id,
                workload = %workload.name,
                state = ?workload.result.state,
                "skipping workload that is not ok"
            );
            continue;
        }
        let outcome = match workload.kind {
            WorkloadType::ZMachine => Vm::decode(workload, bundle).map(|vm| decoded.vms.push(vm)),
            WorkloadType::ZMount => {
                Disk::decode(workload, bundle).map(|disk| decoded.disks.push(disk))
            }
            WorkloadType::Zdb => {
                KvStore::decode(workload, bundle).map(|zdb| decoded.kv_stores.push(zdb))
            }
            WorkloadType::Qsfs => {
                ObjectGateway::decode(workload, bundle).map(|q| decoded.gateways.push(q))
            }
            WorkloadType::Ip => Ok(()),
        };
        if let Err(e) = outcome {
            warn!(
                contract_id = bundle.contract_id,
                workload = %workload.name,
                kind = %workload.kind,
                error = %e,
                "failed to decode workload"
            );
            decoded.failed.push(workload.name.clone());
        }
    }
    decoded
}

/// Encode a deployment's resources: disks, key-value stores, VMs, gateways.
///
/// A gateway that fails to encode is reported with its index in
/// [`Deployment::gateways`].
pub fn encode_deployment(deployment: &Deployment) -> CodecResult<Vec<WireWorkload>> {
    let mut workloads = Vec::new();
    for disk in &deployment.disks {
        workloads.extend(disk.encode()?);
    }
    for zdb in &deployment.kv_stores {
        workloads.extend(zdb.encode()?);
    }
    for vm in &deployment.vms {
        workloads.extend(vm.encode()?);
    }
    for (index, gateway) in deployment.gateways.iter().enumerate() {
        let encoded = gateway.encode().map_err(|source| CodecError::Gateway {
            index,
            source: Box::new(source),
        })?;
        workloads.extend(encoded);
    }
    Ok(workloads)
}
