//! Statements, bindings and the proof envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MAX_INPUT_VALUE;
use crate::crypto::hash::{domain_digest, Digest, BINDING_CONTEXT};
use crate::error::ProofError;
use crate::types::{OperationKind, OwnerId, VaultId};

/// What a proof claims about the plaintext of a ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Statement {
    /// `0 ≤ v`, within the input width.
    NonNegative,
    /// `0 ≤ v ≤ max`.
    RangeBound(u128),
    /// `v ≤` the owner's committed balance identified by this digest.
    OwnershipOf(Digest),
}

impl Statement {
    /// Upper bound on the plaintext once this statement is verified.
    pub fn attested_bound(&self) -> u128 {
        match self {
            Self::RangeBound(max) => (*max).min(MAX_INPUT_VALUE),
            Self::NonNegative | Self::OwnershipOf(_) => MAX_INPUT_VALUE,
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Self::NonNegative => vec![0],
            Self::RangeBound(max) => {
                let mut out = vec![1];
                out.extend_from_slice(&max.to_le_bytes());
                out
            }
            Self::OwnershipOf(commitment) => {
                let mut out = vec![2];
                out.extend_from_slice(commitment.as_bytes());
                out
            }
        }
    }
}

/// Who may use a proof, and for what.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProofContext {
    pub owner: OwnerId,
    pub operation: OperationKind,
    /// `None` only for `CreateVault`, where no id exists yet.
    pub vault_id: Option<VaultId>,
}

impl ProofContext {
    pub fn new(owner: OwnerId, operation: OperationKind, vault_id: Option<VaultId>) -> Self {
        Self { owner, operation, vault_id }
    }
}

/// The public part of a proof: exactly which ciphertext, statement and
/// transition it authorises, and until when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBinding {
    pub ciphertext: Digest,
    pub statement: Statement,
    pub context: ProofContext,
    pub epoch: u64,
    pub expires_at: DateTime<Utc>,
    /// Makes every binding unique, so two proofs over the same inputs are
    /// still two distinct single-use proofs.
    pub nonce: [u8; 16],
}

impl ProofBinding {
    /// Canonical digest of every bound field.
    pub fn digest(&self) -> Digest {
        let operation = [match self.context.operation {
            OperationKind::CreateVault => 0u8,
            OperationKind::AddCollateral => 1,
            OperationKind::Mint => 2,
        }];
        let vault = match self.context.vault_id {
            Some(id) => {
                let mut bytes = [1u8; 9];
                bytes[1..].copy_from_slice(&id.0.to_le_bytes());
                bytes
            }
            None => [0u8; 9],
        };
        domain_digest(
            BINDING_CONTEXT,
            &[
                self.ciphertext.as_bytes(),
                &self.statement.encode(),
                self.context.owner.as_str().as_bytes(),
                &operation,
                &vault,
                &self.epoch.to_le_bytes(),
                &self.expires_at.timestamp_millis().to_le_bytes(),
                &self.nonce,
            ],
        )
    }
}

/// A proof as submitted: binding plus whatever the proof system needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub binding: ProofBinding,
    pub body: Vec<u8>,
}

impl Proof {
    /// Wire encoding (bincode).
    pub fn encode(&self) -> Result<Vec<u8>, ProofError> {
        bincode::serialize(self).map_err(|e| ProofError::Malformed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProofError> {
        if bytes.is_empty() {
            return Err(ProofError::Malformed("empty proof".into()));
        }
        bincode::deserialize(bytes).map_err(|e| ProofError::Malformed(e.to_string()))
    }

    /// The single-use identity of this proof.
    pub fn digest(&self) -> Digest {
        self.binding.digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> ProofBinding {
        ProofBinding {
            ciphertext: domain_digest("test", &[b"ct"]),
            statement: Statement::RangeBound(1_000),
            context: ProofContext::new(OwnerId::new("0xabc"), OperationKind::Mint, Some(VaultId(1))),
            epoch: 0,
            expires_at: Utc::now(),
            nonce: [7; 16],
        }
    }

    #[test]
    fn binding_digest_covers_scope() {
        let base = binding();
        let mut other_vault = base.clone();
        other_vault.context.vault_id = Some(VaultId(2));
        let mut other_op = base.clone();
        other_op.context.operation = OperationKind::AddCollateral;
        let mut other_statement = base.clone();
        other_statement.statement = Statement::RangeBound(1_001);

        assert_ne!(base.digest(), other_vault.digest());
        assert_ne!(base.digest(), other_op.digest());
        assert_ne!(base.digest(), other_statement.digest());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(Proof::decode(&[]), Err(ProofError::Malformed(_))));
        assert!(matches!(Proof::decode(&[0xFF; 7]), Err(ProofError::Malformed(_))));
    }

    #[test]
    fn encode_decode_preserves_identity() {
        let proof = Proof { binding: binding(), body: vec![1, 2, 3] };
        let decoded = Proof::decode(&proof.encode().unwrap()).unwrap();
        assert_eq!(decoded.digest(), proof.digest());
    }

    #[test]
    fn attested_bounds() {
        assert_eq!(Statement::RangeBound(5).attested_bound(), 5);
        assert_eq!(Statement::NonNegative.attested_bound(), MAX_INPUT_VALUE);
        assert_eq!(Statement::RangeBound(u128::MAX).attested_bound(), MAX_INPUT_VALUE);
    }
}
