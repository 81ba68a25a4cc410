//! Codec error types.

use gridlease_core::WorkloadType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode workload {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode workload {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("workload {name}: expected type {expected}, found {found}")]
    UnexpectedType {
        name: String,
        expected: WorkloadType,
        found: WorkloadType,
    },

    #[error("workload {name}: size {value} does not fit in bytes")]
    SizeOverflow { name: String, value: u64 },

    #[error("workload {name} references missing workload {missing}")]
    MissingWorkload { name: String, missing: String },

    #[error("workload {name} has no network interface")]
    MissingInterface { name: String },

    #[error("workload {name}: invalid ip {ip:?}")]
    InvalidIp { name: String, ip: String },

    #[error("gateway {name}: invalid encryption key: {reason}")]
    InvalidKey { name: String, reason: String },

    #[error("gateway {name}: minimal shards {minimal} exceed expected shards {expected}")]
    InvalidShards {
        name: String,
        minimal: u32,
        expected: u32,
    },

    #[error("gateway {name}: {have} backends configured, {need} required")]
    NotEnoughBackends { name: String, have: usize, need: usize },

    #[error("gateway #{index} could not be encoded: {source}")]
    Gateway {
        index: usize,
        #[source]
        source: Box<CodecError>,
    },

    #[error("bundle holds no cluster master")]
    MissingMaster,
}

pub type CodecResult<T> = Result<T, CodecError>;
