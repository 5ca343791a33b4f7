//! # Settlement
//!
//! Liquidation hands a vault to an external settlement process (auction,
//! keeper, manual unwind). The ledger doesn't know how settlement works; it
//! only needs two things:
//!
//! - a [`SettlementHandler`] to tell when a vault enters `Liquidating`, and
//! - a [`SettlementAttestation`] signed by the trusted settlement authority
//!   before it will move that vault to `Closed`.
//!
//! The attestation signs `domain_digest(SETTLEMENT_CONTEXT, vault_id ‖
//! settled_at)`, so a signature for one vault can't close another.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::crypto::hash::{domain_digest, Digest, SETTLEMENT_CONTEXT};
use crate::crypto::keys::{AttestorKeypair, AttestorPublicKey, AttestorSignature};
use crate::types::{Initiator, OwnerId, VaultId};

// ---------------------------------------------------------------------------
// Attestation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementAttestation {
    pub vault_id: VaultId,
    pub settled_at: DateTime<Utc>,
    pub signature: AttestorSignature,
}

impl SettlementAttestation {
    pub fn message(vault_id: VaultId, settled_at: DateTime<Utc>) -> Digest {
        domain_digest(
            SETTLEMENT_CONTEXT,
            &[
                &vault_id.to_key(),
                &settled_at.timestamp_millis().to_be_bytes(),
            ],
        )
    }

    /// Whether this attestation is for `vault_id` and signed by `authority`.
    pub fn verify(&self, vault_id: VaultId, authority: &AttestorPublicKey) -> bool {
        self.vault_id == vault_id
            && authority.verify(
                Self::message(self.vault_id, self.settled_at).as_bytes(),
                &self.signature,
            )
    }
}

/// The signing side. In production this key lives with the settlement
/// service; the node and the tests hold it locally.
#[derive(Clone)]
pub struct SettlementAuthority {
    keys: AttestorKeypair,
}

impl SettlementAuthority {
    pub fn new(keys: AttestorKeypair) -> Self {
        Self { keys }
    }

    pub fn generate() -> Self {
        Self::new(AttestorKeypair::generate())
    }

    pub fn public_key(&self) -> AttestorPublicKey {
        self.keys.public_key()
    }

    pub fn attest(&self, vault_id: VaultId, settled_at: DateTime<Utc>) -> SettlementAttestation {
        let message = SettlementAttestation::message(vault_id, settled_at);
        SettlementAttestation {
            vault_id,
            settled_at,
            signature: self.keys.sign(message.as_bytes()),
        }
    }
}

impl fmt::Debug for SettlementAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementAuthority")
            .field("public_key", &self.public_key())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Sent to the settlement process when a vault is liquidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationNotice {
    pub vault_id: VaultId,
    pub owner: OwnerId,
    pub initiator: Initiator,
    pub at: DateTime<Utc>,
}

/// Called after a liquidation has been committed. Must not block.
pub trait SettlementHandler: Send + Sync + fmt::Debug {
    fn on_liquidation(&self, notice: LiquidationNotice);
}

/// Drops notices on the floor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSettlement;

impl SettlementHandler for NoopSettlement {
    fn on_liquidation(&self, _notice: LiquidationNotice) {}
}

/// Forwards notices to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSettlement {
    tx: mpsc::UnboundedSender<LiquidationNotice>,
}

impl ChannelSettlement {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LiquidationNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SettlementHandler for ChannelSettlement {
    fn on_liquidation(&self, notice: LiquidationNotice) {
        let vault_id = notice.vault_id;
        if self.tx.send(notice).is_err() {
            warn!(%vault_id, "settlement receiver dropped; liquidation notice lost");
        }
    }
}
