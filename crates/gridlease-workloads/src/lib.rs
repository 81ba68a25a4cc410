//! gridlease-workloads — conversion between typed resources and wire workloads.
//!
//! Every resource kind implements [`WorkloadCodec`]; [`dispatch`] selects the
//! codec from the closed [`WorkloadType`](gridlease_core::WorkloadType) tag
//! when decoding a whole bundle, and encodes a deployment in a fixed order.
//!
//! - **`disk`** — block disks (`zmount`)
//! - **`zdb`** — key-value store namespaces
//! - **`vm`** — virtual machines, optionally with a public IP reservation
//! - **`qsfs`** — erasure-coded object gateways
//! - **`k8s`** — k3s clusters spread over several nodes

pub mod codec;
pub mod disk;
pub mod dispatch;
pub mod error;
pub mod k8s;
pub mod qsfs;
pub mod vm;
pub mod zdb;

pub use codec::WorkloadCodec;
pub use dispatch::{DecodedBundle, decode_bundle, encode_deployment};
pub use error::{CodecError, CodecResult};
pub use k8s::ClusterCodec;
