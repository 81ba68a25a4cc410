//! Block disks (`zmount`).

use gridlease_core::{Disk, WireBundle, WireWorkload, WorkloadType};
use serde::{Deserialize, Serialize};

use crate::codec::{GIB, WorkloadCodec, expect_kind, payload, to_bytes, to_data};
use crate::error::CodecResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZMountData {
    /// Size in bytes.
    pub size: u64,
}

impl WorkloadCodec for Disk {
    const KIND: WorkloadType = WorkloadType::ZMount;

    fn encode(&self) -> CodecResult<Vec<WireWorkload>> {
        let size = to_bytes(&self.name, self.size_gb, GIB)?;
        let data = to_data(&self.name, &ZMountData { size })?;
        Ok(vec![WireWorkload::new(&self.name, Self::KIND, data, &self.description)])
    }

    fn decode(workload: &WireWorkload, _bundle: &WireBundle) -> CodecResult<Self> {
        expect_kind(workload, Self::KIND)?;
        let data: ZMountData = payload(workload)?;
        Ok(Disk {
            name: workload.name.clone(),
            size_gb: data.size / GIB,
            description: workload.description.clone(),
        })
    }
}
