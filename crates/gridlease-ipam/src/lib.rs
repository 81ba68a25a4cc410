//! gridlease-ipam — private IPv4 allocation for VMs and cluster nodes.
//!
//! Given a node subnet, the host ids already consumed on that node and a list
//! of resources implementing [`PrivateIp`](gridlease_core::PrivateIp), the
//! allocator:
//! 1. Reserves every pinned address that lies inside the subnet
//! 2. Assigns the lowest free host id to every unassigned resource
//! 3. Fails without side effects once the subnet is full

pub mod allocator;
pub mod error;

pub use allocator::assign_ips;
pub use error::{IpamError, IpamResult};
