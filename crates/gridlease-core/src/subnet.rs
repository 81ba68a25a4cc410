//! IPv4 subnet parsing and host-id arithmetic.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest host id handed out inside a node subnet.
pub const FIRST_HOST_ID: u8 = 2;

/// Highest host id handed out inside a node subnet.
pub const LAST_HOST_ID: u8 = 254;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubnetError {
    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),
    #[error("invalid prefix length in {0}")]
    InvalidPrefix(String),
}

/// An IPv4 network in CIDR form, e.g. `10.1.0.0/24`.
///
/// Node subnets are `/24`-equivalent: the host id of an address is its last
/// octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, SubnetError> {
        if prefix > 32 {
            return Err(SubnetError::InvalidPrefix(format!("{addr}/{prefix}")));
        }
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & mask(prefix)),
            prefix,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & mask(self.prefix) == u32::from(self.network)
    }

    /// Parse `ip` and check membership. Unparseable input is never contained.
    pub fn contains_str(&self, ip: &str) -> bool {
        ip.parse::<Ipv4Addr>().is_ok_and(|ip| self.contains(ip))
    }

    /// Address with the same leading octets as the network and `host_id` as
    /// the last octet.
    pub fn host(&self, host_id: u8) -> Ipv4Addr {
        let [a, b, c, _] = self.network.octets();
        Ipv4Addr::new(a, b, c, host_id)
    }
}

impl FromStr for Subnet {
    type Err = SubnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| SubnetError::InvalidSubnet(s.to_string()))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| SubnetError::InvalidSubnet(s.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| SubnetError::InvalidPrefix(s.to_string()))?;
        Subnet::new(addr, prefix)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl TryFrom<String> for Subnet {
    type Error = SubnetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Subnet> for String {
    fn from(value: Subnet) -> Self {
        value.to_string()
    }
}

/// Last octet of a dotted-quad address, if it parses as IPv4.
pub fn host_id(ip: &str) -> Option<u8> {
    ip.parse::<Ipv4Addr>().ok().map(|ip| ip.octets()[3])
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}
