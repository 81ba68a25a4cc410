//! gridlease.toml configuration parser.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::subnet::Subnet;
use crate::types::{DEFAULT_SOLUTION_TYPE, NodeId, TwinId};

/// Minimum free balance required before sending extrinsics.
pub const DEFAULT_MIN_BALANCE: u64 = 20_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub account: AccountConfig,
    #[serde(default)]
    pub deployer: DeployerConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub twin_id: TwinId,
    /// Ledger account address used for balance checks.
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerConfig {
    #[serde(default = "default_min_balance")]
    pub min_balance: u64,
    #[serde(default = "default_solution_type")]
    pub default_solution_type: String,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            min_balance: DEFAULT_MIN_BALANCE,
            default_solution_type: DEFAULT_SOLUTION_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSubnetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSubnetConfig {
    pub node_id: NodeId,
    pub subnet: Subnet,
}

fn default_min_balance() -> u64 {
    DEFAULT_MIN_BALANCE
}

fn default_solution_type() -> String {
    DEFAULT_SOLUTION_TYPE.to_string()
}

impl GridConfig {
    pub fn new(twin_id: TwinId, identity: &str) -> Self {
        Self {
            account: AccountConfig {
                twin_id,
                identity: identity.to_string(),
            },
            deployer: DeployerConfig::default(),
            networks: Vec::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
