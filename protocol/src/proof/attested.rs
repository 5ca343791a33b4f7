//! # Attested Input Proofs
//!
//! The proof system the engine ships with. An **input attestor** sits next to
//! the co-processor (it is the only party besides the co-processor that can
//! see plaintexts), checks the requested statement against the actual
//! plaintext, and signs the proof binding with Ed25519. The engine-side
//! [`AttestedProofSystem`] accepts a proof iff that signature verifies under
//! the attestor's public key.
//!
//! This is the "input proof" pattern the contract boundary already speaks:
//! every encrypted argument arrives with a signed proof that it is well
//! formed. A zero-knowledge range proof can replace it later without the
//! verifier noticing; it only sees the [`ProofSystem`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use rand::RngCore;
use tracing::debug;

use crate::cipher::{EncryptedValue, SchemeError, SealedCoprocessor};
use crate::clock::SharedClock;
use crate::config::MAX_INPUT_VALUE;
use crate::crypto::keys::{AttestorKeypair, AttestorPublicKey, AttestorSignature};
use crate::error::ProofError;
use crate::proof::statement::{Proof, ProofBinding, ProofContext, Statement};
use crate::proof::verifier::{ProofSystem, ProofSystemError};

/// Why the attestor refused to sign.
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    /// The plaintext does not satisfy the statement.
    #[error("statement does not hold for this ciphertext")]
    StatementFalse,

    /// `OwnershipOf` was requested without the committed balance.
    #[error("ownership statements need the committed balance")]
    MissingBalance,

    #[error("ciphertext: {0}")]
    Ciphertext(#[from] SchemeError),

    #[error("encoding: {0}")]
    Encoding(#[from] ProofError),
}

/// Client-side prover: checks statements and signs bindings.
#[derive(Debug)]
pub struct InputAttestor {
    coprocessor: Arc<SealedCoprocessor>,
    keys: AttestorKeypair,
    clock: SharedClock,
    ttl: chrono::Duration,
}

impl InputAttestor {
    pub fn new(
        coprocessor: Arc<SealedCoprocessor>,
        keys: AttestorKeypair,
        clock: SharedClock,
        ttl: chrono::Duration,
    ) -> Self {
        Self { coprocessor, keys, clock, ttl }
    }

    pub fn public_key(&self) -> AttestorPublicKey {
        self.keys.public_key()
    }

    /// Produce encoded proof bytes for `statement` over `ciphertext`.
    pub fn prove(
        &self,
        ciphertext: &EncryptedValue,
        statement: &Statement,
        context: ProofContext,
        epoch: u64,
    ) -> Result<Vec<u8>, AttestError> {
        let value = self.coprocessor.open_amount(ciphertext)?;
        let holds = match statement {
            Statement::NonNegative => value <= MAX_INPUT_VALUE,
            Statement::RangeBound(max) => value <= *max && value <= MAX_INPUT_VALUE,
            Statement::OwnershipOf(_) => return Err(AttestError::MissingBalance),
        };
        if !holds {
            return Err(AttestError::StatementFalse);
        }
        self.sign(ciphertext, statement.clone(), context, epoch)
    }

    /// Prove `value ≤ balance` for the balance committed as
    /// `balance.digest()`.
    pub fn prove_ownership(
        &self,
        ciphertext: &EncryptedValue,
        balance: &EncryptedValue,
        context: ProofContext,
        epoch: u64,
    ) -> Result<Vec<u8>, AttestError> {
        let value = self.coprocessor.open_amount(ciphertext)?;
        let held = self.coprocessor.open_amount(balance)?;
        if value > held {
            return Err(AttestError::StatementFalse);
        }
        self.sign(ciphertext, Statement::OwnershipOf(balance.digest()), context, epoch)
    }

    fn sign(
        &self,
        ciphertext: &EncryptedValue,
        statement: Statement,
        context: ProofContext,
        epoch: u64,
    ) -> Result<Vec<u8>, AttestError> {
        let mut nonce = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let binding = ProofBinding {
            ciphertext: ciphertext.digest(),
            statement,
            context,
            epoch,
            expires_at: self.clock.now() + self.ttl,
            nonce,
        };
        let digest = binding.digest();
        let signature = self.keys.sign(digest.as_bytes());
        debug!(binding = %digest.short(), operation = %binding.context.operation, "input attested");
        let proof = Proof {
            binding,
            body: signature.as_bytes().to_vec(),
        };
        Ok(proof.encode()?)
    }
}

/// Engine-side verification of attested proofs.
#[derive(Debug, Clone)]
pub struct AttestedProofSystem {
    attestor: AttestorPublicKey,
}

impl AttestedProofSystem {
    pub fn new(attestor: AttestorPublicKey) -> Self {
        Self { attestor }
    }
}

#[async_trait]
impl ProofSystem for AttestedProofSystem {
    async fn verify_proof(
        &self,
        ciphertext: &EncryptedValue,
        proof: &Proof,
        statement: &Statement,
    ) -> Result<bool, ProofSystemError> {
        if proof.binding.ciphertext != ciphertext.digest() || &proof.binding.statement != statement {
            return Ok(false);
        }
        let signature = AttestorSignature::from_bytes(proof.body.clone());
        Ok(self.attestor.verify(proof.binding.digest().as_bytes(), &signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{OperationKind, OwnerId, VaultId};

    fn setup() -> (Arc<SealedCoprocessor>, InputAttestor) {
        let cp = Arc::new(SealedCoprocessor::generate());
        let attestor = InputAttestor::new(
            cp.clone(),
            AttestorKeypair::generate(),
            ManualClock::starting_now(),
            chrono::Duration::minutes(10),
        );
        (cp, attestor)
    }

    fn ctx() -> ProofContext {
        ProofContext::new(OwnerId::new("alice"), OperationKind::AddCollateral, Some(VaultId(3)))
    }

    #[test]
    fn refuses_false_range_statement() {
        let (cp, attestor) = setup();
        let ct = cp.encrypt_input(1_001).unwrap();
        assert!(matches!(
            attestor.prove(&ct, &Statement::RangeBound(1_000), ctx(), 0),
            Err(AttestError::StatementFalse)
        ));
        assert!(attestor.prove(&ct, &Statement::RangeBound(1_001), ctx(), 0).is_ok());
    }

    #[test]
    fn ownership_needs_enough_balance() {
        let (cp, attestor) = setup();
        let balance = cp.encrypt_input(100).unwrap();
        let spend = cp.encrypt_input(60).unwrap();
        let too_much = cp.encrypt_input(160).unwrap();
        assert!(attestor.prove_ownership(&spend, &balance, ctx(), 0).is_ok());
        assert!(matches!(
            attestor.prove_ownership(&too_much, &balance, ctx(), 0),
            Err(AttestError::StatementFalse)
        ));
        assert!(matches!(
            attestor.prove(&spend, &Statement::OwnershipOf(balance.digest()), ctx(), 0),
            Err(AttestError::MissingBalance)
        ));
    }

    #[tokio::test]
    async fn system_checks_signature_and_subject() {
        let (cp, attestor) = setup();
        let system = AttestedProofSystem::new(attestor.public_key());
        let ct = cp.encrypt_input(5).unwrap();
        let bytes = attestor.prove(&ct, &Statement::NonNegative, ctx(), 0).unwrap();
        let proof = Proof::decode(&bytes).unwrap();

        assert!(system.verify_proof(&ct, &proof, &Statement::NonNegative).await.unwrap());
        assert!(!system
            .verify_proof(&ct, &proof, &Statement::RangeBound(5))
            .await
            .unwrap());

        let mut tampered = proof.clone();
        tampered.binding.epoch = 9;
        assert!(!system.verify_proof(&ct, &tampered, &Statement::NonNegative).await.unwrap());
    }

    #[tokio::test]
    async fn ownership_proof_verifies() {
        let (cp, attestor) = setup();
        let system = AttestedProofSystem::new(attestor.public_key());
        let balance = cp.encrypt_input(100).unwrap();
        let spend = cp.encrypt_input(60).unwrap();
        let bytes = attestor.prove_ownership(&spend, &balance, ctx(), 0).unwrap();
        let proof = Proof::decode(&bytes).unwrap();
        let statement = Statement::OwnershipOf(balance.digest());
        assert!(system.verify_proof(&spend, &proof, &statement).await.unwrap());
    }
}
