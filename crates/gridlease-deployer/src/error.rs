//! Deployer error types.

use gridlease_core::{NodeId, ValidationError};
use gridlease_ipam::IpamError;
use gridlease_workloads::CodecError;
use thiserror::Error;

use crate::ledger::LedgerError;

/// Errors that can occur while reconciling deployments.
#[derive(Debug, Error)]
pub enum DeployerError {
    #[error("insufficient balance: {balance} available, {minimum} required")]
    InsufficientBalance { balance: u128, minimum: u128 },

    #[error("invalid deployment: {0}")]
    InvalidDeployment(#[from] ValidationError),

    #[error(transparent)]
    AddressPoolExhausted(#[from] IpamError),

    #[error("failed to generate workload for gateway #{index}: {source}")]
    WorkloadGenerationFailed {
        index: usize,
        #[source]
        source: CodecError,
    },

    #[error("failed to encode deployment: {0}")]
    Codec(CodecError),

    #[error("node {node_id} has no subnet in network {network}")]
    SubnetNotAssigned { network: String, node_id: NodeId },

    #[error("remote deploy failed: {0:#}")]
    RemoteDeployFailed(#[source] anyhow::Error),

    #[error("remote cancel failed: {0:#}")]
    RemoteCancelFailed(#[source] anyhow::Error),

    #[error("fetching running deployments failed: {0:#}")]
    RemoteFetchFailed(#[source] anyhow::Error),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<CodecError> for DeployerError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Gateway { index, source } => DeployerError::WorkloadGenerationFailed {
                index,
                source: *source,
            },
            other => DeployerError::Codec(other),
        }
    }
}

pub type DeployerResult<T> = Result<T, DeployerError>;
