//! Allocator error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpamError {
    #[error("no free host address left in subnet {subnet}")]
    AddressPoolExhausted { subnet: String },
}

pub type IpamResult<T> = Result<T, IpamError>;
