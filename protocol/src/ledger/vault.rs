//! The vault record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cipher::EncryptedValue;
use crate::error::StateError;
use crate::ledger::state::VaultState;
use crate::types::{AssetId, OwnerId, VaultId, VaultStatus};

/// A collateralized debt position. Balances are ciphertexts; the ledger is
/// the only writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    pub owner: OwnerId,
    pub asset: AssetId,
    pub collateral: EncryptedValue,
    pub debt: EncryptedValue,
    pub state: VaultState,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Vault {
    pub fn status(&self) -> VaultStatus {
        self.state.status()
    }

    pub(crate) fn require_active(&self) -> Result<(), StateError> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(StateError::VaultNotActive {
                vault_id: self.id,
                status: self.status(),
            })
        }
    }

    pub fn report(&self) -> VaultReport {
        VaultReport {
            vault_id: self.id,
            owner: self.owner.clone(),
            asset: self.asset.clone(),
            status: self.status(),
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
        }
    }
}

/// Public view of a vault. No balances, encrypted or otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultReport {
    pub vault_id: VaultId,
    pub owner: OwnerId,
    pub asset: AssetId,
    pub status: VaultStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}
