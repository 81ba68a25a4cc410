//! The per-kind conversion boundary and helpers shared by the codecs.

use gridlease_core::{WireBundle, WireWorkload, WorkloadType};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CodecError, CodecResult};

pub(crate) const MIB: u64 = 1024 * 1024;
pub(crate) const GIB: u64 = 1024 * MIB;

/// Conversion between a typed resource and its wire workloads.
pub trait WorkloadCodec: Sized {
    /// Tag of the workload [`WorkloadCodec::decode`] accepts.
    const KIND: WorkloadType;

    /// Wire workloads for this resource, in the order the node needs them.
    fn encode(&self) -> CodecResult<Vec<WireWorkload>>;

    /// Rebuild the resource from its primary workload. `bundle` gives access
    /// to auxiliary workloads it references.
    fn decode(workload: &WireWorkload, bundle: &WireBundle) -> CodecResult<Self>;
}

pub(crate) fn expect_kind(workload: &WireWorkload, expected: WorkloadType) -> CodecResult<()> {
    if workload.kind == expected {
        Ok(())
    } else {
        Err(CodecError::UnexpectedType {
            name: workload.name.clone(),
            expected,
            found: workload.kind,
        })
    }
}

/// `value` counted in `unit`s, as bytes.
pub(crate) fn to_bytes(name: &str, value: u64, unit: u64) -> CodecResult<u64> {
    value
        .checked_mul(unit)
        .ok_or_else(|| CodecError::SizeOverflow {
            name: name.to_string(),
            value,
        })
}

pub(crate) fn to_data<T: Serialize>(name: &str, data: &T) -> CodecResult<serde_json::Value> {
    serde_json::to_value(data).map_err(|source| CodecError::Encode {
        name: name.to_string(),
        source,
    })
}

pub(crate) fn payload<T: DeserializeOwned>(workload: &WireWorkload) -> CodecResult<T> {
    serde_json::from_value(workload.data.clone()).map_err(|source| CodecError::Decode {
        name: workload.name.clone(),
        source,
    })
}

/// Result payload of `workload`; a workload without result data yields the default.
pub(crate) fn result_data<T: DeserializeOwned + Default>(workload: &WireWorkload) -> CodecResult<T> {
    if workload.result.data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(workload.result.data.clone()).map_err(|source| CodecError::Decode {
        name: workload.name.clone(),
        source,
    })
}
