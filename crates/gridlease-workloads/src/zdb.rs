//! Key-value store namespaces (`zdb`).

use gridlease_core::{KvMode, KvStore, WireBundle, WireWorkload, WorkloadType};
use serde::{Deserialize, Serialize};

use crate::codec::{GIB, WorkloadCodec, expect_kind, payload, result_data, to_bytes, to_data};
use crate::error::CodecResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZdbData {
    pub size: u64,
    pub mode: KvMode,
    pub password: String,
    pub public: bool,
}

/// Reported by the node once the namespace exists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZdbResult {
    pub namespace: String,
    pub ips: Vec<String>,
    pub port: u32,
}

impl WorkloadCodec for KvStore {
    const KIND: WorkloadType = WorkloadType::Zdb;

    fn encode(&self) -> CodecResult<Vec<WireWorkload>> {
        let data = to_data(
            &self.name,
            &ZdbData {
                size: to_bytes(&self.name, self.size_gb, GIB)?,
                mode: self.mode,
                password: self.password.clone(),
                public: self.public,
            },
        )?;
        Ok(vec![WireWorkload::new(&self.name, Self::KIND, data, &self.description)])
    }

    fn decode(workload: &WireWorkload, _bundle: &WireBundle) -> CodecResult<Self> {
        expect_kind(workload, Self::KIND)?;
        let data: ZdbData = payload(workload)?;
        let result: ZdbResult = result_data(workload)?;
        Ok(KvStore {
            name: workload.name.clone(),
            password: data.password,
            public: data.public,
            size_gb: data.size / GIB,
            description: workload.description.clone(),
            mode: data.mode,
            ips: result.ips,
            port: result.port,
            namespace: result.namespace,
        })
    }
}
