//! Core type definitions

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw on-chain quantity (token balance, badge count, ...)
pub type Quantity = U256;

/// Holder identity. Compared case-insensitively, so `0xAbC` and `0xabc`
/// refer to the same owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one source within an aggregation run (e.g. `mainnetQuantity`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(String);

impl SourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque network identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainRef(String);

impl ChainRef {
    pub fn new(chain: impl AsRef<str>) -> Self {
        Self(chain.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contract on a given network. Addresses are normalized to lowercase so
/// that the same contract discovered twice compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractRef {
    pub chain: ChainRef,
    pub address: String,
}

impl ContractRef {
    pub fn new(chain: impl AsRef<str>, address: impl AsRef<str>) -> Self {
        Self {
            chain: ChainRef::new(chain),
            address: address.as_ref().trim().to_lowercase(),
        }
    }
}

impl fmt::Display for ContractRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.address)
    }
}

/// Primary key of a cached badge asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AssetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AssetId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A badge held by an owner, as returned by a badge listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeDescriptor {
    pub chain: ChainRef,
    pub contract: String,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub asset_id: Option<AssetId>,
    #[serde(default)]
    pub name: Option<String>,
}

impl BadgeDescriptor {
    pub fn contract_ref(&self) -> ContractRef {
        ContractRef::new(self.chain.as_str(), &self.contract)
    }
}

/// How a derived category treats a component that has no value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// A missing summand counts as zero
    #[serde(alias = "zero")]
    ZeroDefault,
    /// Any missing component makes the category unknown
    Absent,
}

impl MissingPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            MissingPolicy::ZeroDefault => "zero_default",
            MissingPolicy::Absent => "absent",
        }
    }
}

/// Parse a quantity from its decimal or `0x`-prefixed hex form
pub fn parse_quantity(raw: &str) -> Option<Quantity> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16).ok(),
        None => U256::from_str_radix(raw, 10).ok(),
    }
}
