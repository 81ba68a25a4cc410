//! Contract ledger boundary.

use async_trait::async_trait;
use gridlease_core::ContractId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("ledger request failed: {0:#}")]
    Rpc(#[source] anyhow::Error),
}

/// Queries against the chain holding contracts and balances.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Whether the contract is still active on chain.
    async fn is_valid_contract(&self, contract_id: ContractId) -> Result<bool, LedgerError>;

    /// Free balance of the account.
    async fn get_balance(&self, identity: &str) -> Result<u128, LedgerError>;
}
