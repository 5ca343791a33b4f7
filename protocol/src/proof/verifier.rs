//! # Proof Verifier
//!
//! Turns `(ciphertext, proof bytes, statement, scope)` into a
//! [`CapabilityToken`] or a precise rejection. The checks run cheapest
//! first and none of them has side effects:
//!
//! 1. the proof decodes                          → `Malformed`
//! 2. the ciphertext is of a supported scheme and
//!    is the one the binding names                → `StatementMismatch`
//! 3. the binding's statement is the one required → `StatementMismatch`
//! 4. the binding's owner is the acting owner     → `OwnershipMismatch`
//! 5. the binding's operation and vault match     → `StatementMismatch`
//! 6. the binding is from this epoch, unexpired   → `ExpiredBinding`
//! 7. the proof hasn't been consumed              → `AlreadyConsumed`
//! 8. the proof system accepts it                 → `InvalidProof`
//!
//! Step 8 may be a remote call. It runs under a timeout with bounded
//! exponential backoff on transient failures; if the budget runs out the
//! caller gets a `TransientError`, never a pass.
//!
//! Verification does not consume anything. The token is redeemed by the
//! ledger at commit time through [`Verifier::redeem`], which is the single
//! place a proof digest is claimed. Redemption re-checks the binding's epoch
//! and expiry, so a token held across either is refused.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cipher::{EncryptedValue, SchemeTag};
use crate::clock::SharedClock;
use crate::config::VerifierConfig;
use crate::crypto::hash::Digest;
use crate::error::{ProofError, Result, TransientError, VaultError};
use crate::proof::registry::{ConsumedEntry, ConsumedProofs, Redemption};
use crate::proof::statement::{Proof, ProofContext, Statement};
use crate::retry::{retry_with_timeout, RetryError, Retryable};
use crate::storage::DbResult;

// ---------------------------------------------------------------------------
// ProofSystem capability
// ---------------------------------------------------------------------------

/// Failures of the proof system itself (as opposed to "this proof is bad",
/// which is `Ok(false)`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofSystemError {
    /// Temporarily unreachable or overloaded. Retried.
    #[error("proof system unavailable: {0}")]
    Unavailable(String),

    /// The proof is not something this system can evaluate at all.
    #[error("proof rejected by proof system: {0}")]
    Unsupported(String),
}

impl Retryable for ProofSystemError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Verifies that `proof` establishes `statement` about `ciphertext`.
#[async_trait]
pub trait ProofSystem: Send + Sync + fmt::Debug {
    async fn verify_proof(
        &self,
        ciphertext: &EncryptedValue,
        proof: &Proof,
        statement: &Statement,
    ) -> std::result::Result<bool, ProofSystemError>;
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// The transition a proof is being presented for.
pub type VerifyScope = ProofContext;

/// Proof that verification passed, scoped to exactly one transition.
///
/// Not `Clone`: one verification, one redemption.
#[derive(Debug)]
pub struct CapabilityToken {
    proof: Digest,
    ciphertext: Digest,
    statement: Statement,
    scope: VerifyScope,
    epoch: u64,
    expires_at: DateTime<Utc>,
}

impl CapabilityToken {
    pub fn proof_digest(&self) -> &Digest {
        &self.proof
    }

    pub fn ciphertext_digest(&self) -> &Digest {
        &self.ciphertext
    }

    pub fn scope(&self) -> &VerifyScope {
        &self.scope
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Upper bound the verified statement places on the plaintext.
    pub fn attested_bound(&self) -> u128 {
        self.statement.attested_bound()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Verifier {
    system: Arc<dyn ProofSystem>,
    registry: Arc<ConsumedProofs>,
    clock: SharedClock,
    config: VerifierConfig,
    scheme: SchemeTag,
    scheme_version: u16,
}

impl Verifier {
    /// `scheme` / `scheme_version` name the only ciphertexts this verifier
    /// accepts.
    pub fn new(
        system: Arc<dyn ProofSystem>,
        registry: Arc<ConsumedProofs>,
        clock: SharedClock,
        config: VerifierConfig,
        scheme: (SchemeTag, u16),
    ) -> Self {
        Self {
            system,
            registry,
            clock,
            config,
            scheme: scheme.0,
            scheme_version: scheme.1,
        }
    }

    pub fn registry(&self) -> &Arc<ConsumedProofs> {
        &self.registry
    }

    pub fn epoch(&self) -> u64 {
        self.registry.epoch()
    }

    /// Invalidate every outstanding proof.
    pub fn advance_epoch(&self) -> DbResult<u64> {
        self.registry.advance_epoch(self.clock.now())
    }

    /// Forget consumed proofs whose bindings can no longer verify.
    pub fn prune_consumed(&self) -> DbResult<usize> {
        self.registry.prune(self.clock.now())
    }

    /// Run every check and issue a token.
    pub async fn verify(
        &self,
        ciphertext: &EncryptedValue,
        proof_bytes: &[u8],
        statement: &Statement,
        scope: &VerifyScope,
    ) -> Result<CapabilityToken> {
        let proof = Proof::decode(proof_bytes)?;
        self.check_binding(ciphertext, &proof, statement, scope)?;

        let accepted = retry_with_timeout(
            &self.config.retry,
            self.config.timeout(),
            "verify_proof",
            |_| self.system.verify_proof(ciphertext, &proof, statement),
        )
        .await
        .map_err(system_error)?;

        if !accepted {
            warn!(
                proof = %proof.digest().short(),
                operation = %scope.operation,
                owner = %scope.owner,
                "proof system rejected proof"
            );
            return Err(ProofError::InvalidProof.into());
        }

        debug!(proof = %proof.digest().short(), operation = %scope.operation, "proof verified");
        Ok(CapabilityToken {
            proof: proof.digest(),
            ciphertext: ciphertext.digest(),
            statement: statement.clone(),
            scope: scope.clone(),
            epoch: proof.binding.epoch,
            expires_at: proof.binding.expires_at,
        })
    }

    /// Claim the token's proof digest for the transition `scope`.
    ///
    /// Fails if the token was issued for a different transition or if the
    /// proof has been consumed since verification.
    pub fn redeem(&self, token: CapabilityToken, scope: &VerifyScope) -> Result<Redemption<'_>> {
        if &token.scope != scope {
            return Err(ProofError::StatementMismatch {
                reason: format!(
                    "token scoped to {} on {:?}, presented for {} on {:?}",
                    token.scope.operation, token.scope.vault_id, scope.operation, scope.vault_id
                ),
            }
            .into());
        }
        let now = self.clock.now();
        let entry = ConsumedEntry {
            consumed_at: now,
            expires_at: token.expires_at,
            epoch: token.epoch,
        };
        if entry.is_prunable(now, self.registry.epoch()) {
            return Err(ProofError::ExpiredBinding {
                reason: "binding lapsed between verification and commit".into(),
            }
            .into());
        }
        Ok(self.registry.claim(token.proof, entry)?)
    }

    fn check_binding(
        &self,
        ciphertext: &EncryptedValue,
        proof: &Proof,
        statement: &Statement,
        scope: &VerifyScope,
    ) -> std::result::Result<(), ProofError> {
        let binding = &proof.binding;

        if ciphertext.scheme() != &self.scheme || ciphertext.version() != self.scheme_version {
            return Err(mismatch(format!(
                "unsupported ciphertext scheme {}/v{}",
                ciphertext.scheme(),
                ciphertext.version()
            )));
        }
        if binding.ciphertext != ciphertext.digest() {
            return Err(mismatch("proof is bound to a different ciphertext".into()));
        }
        if &binding.statement != statement {
            return Err(mismatch(format!(
                "proof attests {:?}, transition requires {:?}",
                binding.statement, statement
            )));
        }
        if binding.context.owner != scope.owner {
            return Err(ProofError::OwnershipMismatch {
                expected: scope.owner.to_string(),
                bound_to: binding.context.owner.to_string(),
            });
        }
        if binding.context.operation != scope.operation {
            return Err(mismatch(format!(
                "proof is for {}, not {}",
                binding.context.operation, scope.operation
            )));
        }
        if binding.context.vault_id != scope.vault_id {
            return Err(mismatch(format!(
                "proof is for vault {:?}, not {:?}",
                binding.context.vault_id, scope.vault_id
            )));
        }

        let epoch = self.registry.epoch();
        if binding.epoch != epoch {
            return Err(ProofError::ExpiredBinding {
                reason: format!("bound to epoch {}, current epoch is {epoch}", binding.epoch),
            });
        }
        let now = self.clock.now();
        if binding.expires_at <= now {
            return Err(ProofError::ExpiredBinding {
                reason: format!("expired at {}", binding.expires_at.to_rfc3339()),
            });
        }

        if self.registry.is_consumed(&proof.digest()) {
            return Err(ProofError::AlreadyConsumed {
                digest: proof.digest().to_hex(),
            });
        }
        Ok(())
    }
}

fn system_error(err: RetryError<ProofSystemError>) -> VaultError {
    match err {
        RetryError::TimedOut { timeout, .. } => TransientError::Timeout {
            operation: "verify_proof",
            after_ms: timeout.as_millis() as u64,
        }
        .into(),
        RetryError::Exhausted { last, .. } => TransientError::Backend {
            operation: "verify_proof",
            reason: last.to_string(),
        }
        .into(),
        RetryError::Fatal(e) => ProofError::Malformed(e.to_string()).into(),
    }
}

fn mismatch(reason: String) -> ProofError {
    ProofError::StatementMismatch { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::cipher::coprocessor::{SealedCoprocessor, SCHEME_VERSION};
    use crate::cipher::HomomorphicScheme;
    use crate::clock::ManualClock;
    use crate::crypto::keys::AttestorKeypair;
    use crate::proof::attested::{AttestedProofSystem, InputAttestor};
    use crate::retry::RetryPolicy;
    use crate::types::{OperationKind, OwnerId, VaultId};

    struct Fixture {
        cp: Arc<SealedCoprocessor>,
        clock: Arc<ManualClock>,
        attestor: InputAttestor,
        verifier: Verifier,
    }

    fn fixture() -> Fixture {
        let cp = Arc::new(SealedCoprocessor::generate());
        let clock = ManualClock::starting_now();
        let keys = AttestorKeypair::generate();
        let config = VerifierConfig::default();
        let attestor =
            InputAttestor::new(cp.clone(), keys.clone(), clock.clone(), config.proof_ttl());
        let system = Arc::new(AttestedProofSystem::new(keys.public_key()));
        let verifier = Verifier::new(
            system,
            Arc::new(ConsumedProofs::in_memory()),
            clock.clone(),
            config,
            (cp.tag().clone(), SCHEME_VERSION),
        );
        Fixture { cp, clock, attestor, verifier }
    }

    fn alice_mint(vault: u64) -> VerifyScope {
        ProofContext::new(OwnerId::new("alice"), OperationKind::Mint, Some(VaultId(vault)))
    }

    #[tokio::test]
    async fn valid_proof_yields_scoped_token() {
        let f = fixture();
        let ct = f.cp.encrypt_input(500).unwrap();
        let statement = Statement::RangeBound(1_000);
        let proof = f.attestor.prove(&ct, &statement, alice_mint(1), f.verifier.epoch()).unwrap();

        let token = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await.unwrap();
        assert_eq!(token.attested_bound(), 1_000);
        assert_eq!(token.ciphertext_digest(), &ct.digest());
    }

    #[tokio::test]
    async fn each_binding_field_is_enforced() {
        let f = fixture();
        let ct = f.cp.encrypt_input(500).unwrap();
        let statement = Statement::RangeBound(1_000);
        let proof = f.attestor.prove(&ct, &statement, alice_mint(1), 0).unwrap();

        let other_ct = f.cp.encrypt_input(500).unwrap();
        let err = f.verifier.verify(&other_ct, &proof, &statement, &alice_mint(1)).await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::StatementMismatch { .. }))));

        let err = f
            .verifier
            .verify(&ct, &proof, &Statement::RangeBound(2_000), &alice_mint(1))
            .await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::StatementMismatch { .. }))));

        let bob = ProofContext::new(OwnerId::new("bob"), OperationKind::Mint, Some(VaultId(1)));
        let err = f.verifier.verify(&ct, &proof, &statement, &bob).await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::OwnershipMismatch { .. }))));

        let err = f.verifier.verify(&ct, &proof, &statement, &alice_mint(2)).await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::StatementMismatch { .. }))));

        let topup =
            ProofContext::new(OwnerId::new("alice"), OperationKind::AddCollateral, Some(VaultId(1)));
        let err = f.verifier.verify(&ct, &proof, &statement, &topup).await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::StatementMismatch { .. }))));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let f = fixture();
        let ct = f.cp.encrypt_input(1).unwrap();
        let err = f
            .verifier
            .verify(&ct, b"definitely not a proof", &Statement::NonNegative, &alice_mint(1))
            .await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::Malformed(_)))));
    }

    #[tokio::test]
    async fn expiry_and_epoch() {
        let f = fixture();
        let ct = f.cp.encrypt_input(1).unwrap();
        let statement = Statement::NonNegative;

        let proof = f.attestor.prove(&ct, &statement, alice_mint(1), 0).unwrap();
        f.clock.advance(chrono::Duration::hours(1));
        let err = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::ExpiredBinding { .. }))));

        let proof = f.attestor.prove(&ct, &statement, alice_mint(1), 0).unwrap();
        f.verifier.advance_epoch().unwrap();
        let err = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::ExpiredBinding { .. }))));
    }

    #[tokio::test]
    async fn forged_signature_is_invalid() {
        let f = fixture();
        let ct = f.cp.encrypt_input(1).unwrap();
        let rogue = InputAttestor::new(
            f.cp.clone(),
            AttestorKeypair::generate(),
            f.clock.clone(),
            chrono::Duration::minutes(5),
        );
        let proof = rogue.prove(&ct, &Statement::NonNegative, alice_mint(1), 0).unwrap();
        let err = f.verifier.verify(&ct, &proof, &Statement::NonNegative, &alice_mint(1)).await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::InvalidProof))));
    }

    #[tokio::test]
    async fn redeem_is_single_use_and_scoped() {
        let f = fixture();
        let ct = f.cp.encrypt_input(1).unwrap();
        let statement = Statement::NonNegative;
        let proof = f.attestor.prove(&ct, &statement, alice_mint(1), 0).unwrap();

        let token = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await.unwrap();
        let err = f.verifier.redeem(token, &alice_mint(2));
        assert!(matches!(err, Err(VaultError::Proof(ProofError::StatementMismatch { .. }))));

        let token = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await.unwrap();
        let second = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await.unwrap();
        f.verifier.redeem(token, &alice_mint(1)).unwrap().commit();
        assert!(matches!(
            f.verifier.redeem(second, &alice_mint(1)),
            Err(VaultError::Proof(ProofError::AlreadyConsumed { .. }))
        ));
        let err = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::AlreadyConsumed { .. }))));
    }

    #[tokio::test]
    async fn token_held_past_expiry_is_not_redeemed() {
        let f = fixture();
        let ct = f.cp.encrypt_input(1).unwrap();
        let statement = Statement::NonNegative;
        let proof = f.attestor.prove(&ct, &statement, alice_mint(1), 0).unwrap();

        let token = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await.unwrap();
        f.clock.advance(chrono::Duration::hours(1));
        assert!(matches!(
            f.verifier.redeem(token, &alice_mint(1)),
            Err(VaultError::Proof(ProofError::ExpiredBinding { .. }))
        ));
        assert!(f.verifier.registry().is_empty());
    }

    #[tokio::test]
    async fn pruned_proof_still_cannot_be_reused() {
        let f = fixture();
        let ct = f.cp.encrypt_input(1).unwrap();
        let statement = Statement::NonNegative;
        let proof = f.attestor.prove(&ct, &statement, alice_mint(1), 0).unwrap();

        let first = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await.unwrap();
        let second = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await.unwrap();
        f.verifier.redeem(first, &alice_mint(1)).unwrap().commit();

        f.clock.advance(chrono::Duration::hours(1));
        assert_eq!(f.verifier.prune_consumed().unwrap(), 1);
        assert!(f.verifier.registry().is_empty());
        assert!(matches!(
            f.verifier.redeem(second, &alice_mint(1)),
            Err(VaultError::Proof(ProofError::ExpiredBinding { .. }))
        ));
        let err = f.verifier.verify(&ct, &proof, &statement, &alice_mint(1)).await;
        assert!(matches!(err, Err(VaultError::Proof(ProofError::ExpiredBinding { .. }))));
    }

    #[derive(Debug, Default)]
    struct FlakySystem {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl ProofSystem for FlakySystem {
        async fn verify_proof(
            &self,
            _ciphertext: &EncryptedValue,
            _proof: &Proof,
            _statement: &Statement,
        ) -> std::result::Result<bool, ProofSystemError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                Err(ProofSystemError::Unavailable(format!("attempt {n}")))
            } else {
                Ok(true)
            }
        }
    }

    fn flaky_verifier(f: &Fixture, fail_first: u32) -> (Arc<FlakySystem>, Verifier) {
        let system = Arc::new(FlakySystem { calls: AtomicU32::new(0), fail_first });
        let config = VerifierConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 10,
                max_backoff_ms: 40,
                multiplier: 2,
            },
            ..VerifierConfig::default()
        };
        let verifier = Verifier::new(
            system.clone(),
            Arc::new(ConsumedProofs::in_memory()),
            f.clock.clone(),
            config,
            (f.cp.tag().clone(), SCHEME_VERSION),
        );
        (system, verifier)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let f = fixture();
        let (system, verifier) = flaky_verifier(&f, 2);
        let ct = f.cp.encrypt_input(1).unwrap();
        let proof = f.attestor.prove(&ct, &Statement::NonNegative, alice_mint(1), 0).unwrap();
        verifier.verify(&ct, &proof, &Statement::NonNegative, &alice_mint(1)).await.unwrap();
        assert_eq!(system.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_as_transient() {
        let f = fixture();
        let (_, verifier) = flaky_verifier(&f, 10);
        let ct = f.cp.encrypt_input(1).unwrap();
        let proof = f.attestor.prove(&ct, &Statement::NonNegative, alice_mint(1), 0).unwrap();
        let err = verifier
            .verify(&ct, &proof, &Statement::NonNegative, &alice_mint(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
