//! Identifiers and small enums shared across the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_COLLATERAL_ASSET;

/// Unique vault identifier. Assigned monotonically, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VaultId(pub u64);

impl VaultId {
    /// Big-endian key so sled's lexicographic order matches numeric order.
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = key.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vault#{}", self.0)
    }
}

/// Opaque owner identity (an account address at the contract boundary).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collateral asset symbol, e.g. `ETH`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new(DEFAULT_COLLATERAL_ASSET)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The mutating operation a proof is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CreateVault,
    AddCollateral,
    Mint,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateVault => "create_vault",
            Self::AddCollateral => "add_collateral",
            Self::Mint => "mint",
        };
        f.write_str(name)
    }
}

/// Who asked for a liquidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initiator {
    /// The liquidation monitor.
    Monitor,
    /// A human operator acting on a review flag.
    Operator,
    /// Anybody else. Only honoured under permissionless liquidation.
    External(OwnerId),
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monitor => f.write_str("monitor"),
            Self::Operator => f.write_str("operator"),
            Self::External(who) => write!(f, "external({who})"),
        }
    }
}

/// Public lifecycle status of a vault. Carries no balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    Active,
    Liquidating,
    Closed,
}

impl fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Liquidating => "liquidating",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_keys_sort_numerically() {
        let a = VaultId(9).to_key();
        let b = VaultId(10).to_key();
        assert!(a < b);
        assert_eq!(VaultId::from_key(&b), Some(VaultId(10)));
        assert_eq!(VaultId::from_key(b"short"), None);
    }

    #[test]
    fn default_asset_is_eth() {
        assert_eq!(AssetId::default().as_str(), "ETH");
    }
}
