//! Ledger events, broadcast after each committed (or rejected) transition.
//! The node's metrics exporter is the main subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Initiator, OwnerId, VaultId};

/// Capacity of the event channel. Slow subscribers lag, they don't block
/// the ledger.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    VaultCreated {
        vault_id: VaultId,
        owner: OwnerId,
        at: DateTime<Utc>,
    },
    CollateralAdded {
        vault_id: VaultId,
        at: DateTime<Utc>,
    },
    Minted {
        vault_id: VaultId,
        price_seq: u64,
        at: DateTime<Utc>,
    },
    MintRejected {
        vault_id: VaultId,
        price_seq: u64,
        at: DateTime<Utc>,
    },
    Liquidated {
        vault_id: VaultId,
        initiator: Initiator,
        at: DateTime<Utc>,
    },
    Closed {
        vault_id: VaultId,
        at: DateTime<Utc>,
    },
}

impl LedgerEvent {
    pub fn vault_id(&self) -> VaultId {
        match self {
            Self::VaultCreated { vault_id, .. }
            | Self::CollateralAdded { vault_id, .. }
            | Self::Minted { vault_id, .. }
            | Self::MintRejected { vault_id, .. }
            | Self::Liquidated { vault_id, .. }
            | Self::Closed { vault_id, .. } => *vault_id,
        }
    }

    /// Short label, used as a metrics label value.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::VaultCreated { .. } => "created",
            Self::CollateralAdded { .. } => "collateral_added",
            Self::Minted { .. } => "minted",
            Self::MintRejected { .. } => "mint_rejected",
            Self::Liquidated { .. } => "liquidated",
            Self::Closed { .. } => "closed",
        }
    }
}
