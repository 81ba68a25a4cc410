//! Object storage gateways (`qsfs`).
//!
//! Encoding validates the erasure-coding parameters before anything is sent
//! to the node; a gateway that cannot work is rejected here.

use gridlease_core::{
    Backend, BackendGroup, GatewayMetadata, ObjectGateway, WireBundle, WireWorkload, WorkloadType,
};
use serde::{Deserialize, Serialize};

use crate::codec::{MIB, WorkloadCodec, expect_kind, payload, result_data, to_bytes, to_data};
use crate::error::{CodecError, CodecResult};

/// Encryption key length in bytes.
pub const KEY_LEN: usize = 32;

const ENCRYPTION_ALGORITHM: &str = "AES";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Encryption {
    pub algorithm: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireBackend {
    pub address: String,
    pub namespace: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireGroup {
    pub backends: Vec<WireBackend>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetaConfig {
    pub prefix: String,
    pub encryption: Encryption,
    pub backends: Vec<WireBackend>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "type")]
    pub kind: String,
    pub config: MetaConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Compression {
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QsfsConfig {
    pub minimal_shards: u32,
    pub expected_shards: u32,
    pub redundant_groups: u32,
    pub redundant_nodes: u32,
    pub max_zdb_data_dir_size: u32,
    pub encryption: Encryption,
    pub meta: Meta,
    pub groups: Vec<WireGroup>,
    pub compression: Compression,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QsfsData {
    /// Local cache size in bytes.
    pub cache: u64,
    pub config: QsfsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QsfsResult {
    pub path: String,
    pub metrics_endpoint: String,
}

/// Check erasure-coding parameters and the encryption key.
pub fn validate_gateway(gateway: &ObjectGateway) -> CodecResult<()> {
    validate_key(&gateway.name, &gateway.encryption_key)?;
    if !gateway.metadata.encryption_key.is_empty() {
        validate_key(&gateway.name, &gateway.metadata.encryption_key)?;
    }
    if gateway.minimal_shards > gateway.expected_shards {
        return Err(CodecError::InvalidShards {
            name: gateway.name.clone(),
            minimal: gateway.minimal_shards,
            expected: gateway.expected_shards,
        });
    }
    let have: usize = gateway.groups.iter().map(|g| g.backends.len()).sum();
    let need = gateway.expected_shards as usize;
    if have < need {
        return Err(CodecError::NotEnoughBackends {
            name: gateway.name.clone(),
            have,
            need,
        });
    }
    Ok(())
}

fn validate_key(name: &str, key: &str) -> CodecResult<()> {
    let bytes = hex::decode(key).map_err(|e| CodecError::InvalidKey {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    if bytes.len() != KEY_LEN {
        return Err(CodecError::InvalidKey {
            name: name.to_string(),
            reason: format!("expected {KEY_LEN} bytes, got {}", bytes.len()),
        });
    }
    Ok(())
}

fn encryption(key: &str) -> Encryption {
    Encryption {
        algorithm: ENCRYPTION_ALGORITHM.to_string(),
        key: key.to_string(),
    }
}

fn to_wire(backends: &[Backend]) -> Vec<WireBackend> {
    backends
        .iter()
        .map(|b| WireBackend {
            address: b.address.clone(),
            namespace: b.namespace.clone(),
            password: b.password.clone(),
        })
        .collect()
}

fn from_wire(backends: Vec<WireBackend>) -> Vec<Backend> {
    backends
        .into_iter()
        .map(|b| Backend {
            address: b.address,
            namespace: b.namespace,
            password: b.password,
        })
        .collect()
}

impl WorkloadCodec for ObjectGateway {
    const KIND: WorkloadType = WorkloadType::Qsfs;

    fn encode(&self) -> CodecResult<Vec<WireWorkload>> {
        validate_gateway(self)?;

        let data = QsfsData {
            cache: to_bytes(&self.name, self.cache_size_mb, MIB)?,
            config: QsfsConfig {
                minimal_shards: self.minimal_shards,
                expected_shards: self.expected_shards,
                redundant_groups: self.redundant_groups,
                redundant_nodes: self.redundant_nodes,
                max_zdb_data_dir_size: self.max_zdb_data_dir_size,
                encryption: encryption(&self.encryption_key),
                meta: Meta {
                    kind: self.metadata.kind.clone(),
                    config: MetaConfig {
                        prefix: self.metadata.prefix.clone(),
                        encryption: encryption(&self.metadata.encryption_key),
                        backends: to_wire(&self.metadata.backends),
                    },
                },
                groups: self
                    .groups
                    .iter()
                    .map(|g| WireGroup {
                        backends: to_wire(&g.backends),
                    })
                    .collect(),
                compression: Compression {
                    algorithm: self.compression.clone(),
                },
            },
        };
        let data = to_data(&self.name, &data)?;
        Ok(vec![WireWorkload::new(&self.name, Self::KIND, data, &self.description)])
    }

    fn decode(workload: &WireWorkload, _bundle: &WireBundle) -> CodecResult<Self> {
        expect_kind(workload, Self::KIND)?;
        let data: QsfsData = payload(workload)?;
        let result: QsfsResult = result_data(workload)?;
        let config = data.config;
        Ok(ObjectGateway {
            name: workload.name.clone(),
            description: workload.description.clone(),
            cache_size_mb: data.cache / MIB,
            minimal_shards: config.minimal_shards,
            expected_shards: config.expected_shards,
            redundant_groups: config.redundant_groups,
            redundant_nodes: config.redundant_nodes,
            max_zdb_data_dir_size: config.max_zdb_data_dir_size,
            encryption_key: config.encryption.key,
            compression: config.compression.algorithm,
            metadata: GatewayMetadata {
                kind: config.meta.kind,
                prefix: config.meta.config.prefix,
                encryption_key: config.meta.config.encryption.key,
                backends: from_wire(config.meta.config.backends),
            },
            groups: config
                .groups
                .into_iter()
                .map(|g| BackendGroup {
                    backends: from_wire(g.backends),
                })
                .collect(),
            metrics_endpoint: result.metrics_endpoint,
        })
    }
}
