//! # Error Taxonomy
//!
//! Every fallible engine operation returns [`VaultError`], which is nothing
//! more than a tagged union over five categories:
//!
//! | Category             | Retry?  | Meaning                                        |
//! |----------------------|---------|------------------------------------------------|
//! | `ProofError`         | never   | the caller's proof does not authorise this     |
//! | `StateError`         | never   | the vault is not in a state that allows this   |
//! | `OracleError`        | never   | no trustworthy price, valuation stops          |
//! | `InvariantViolation` | never   | committing would break solvency or arithmetic  |
//! | `TransientError`     | yes     | a dependency was slow or down; try again       |
//!
//! plus `Storage` for persistence failures. Transient errors are already
//! retried with bounded backoff at the call site before they surface here,
//! so a caller seeing one knows the engine gave up, not that it didn't try.
//!
//! None of these ever degrade to "allow". A failed check is a failed
//! transition with state unchanged.

use crate::storage::DbError;
use crate::types::{AssetId, Initiator, VaultId, VaultStatus};

/// Crate-wide result alias.
pub type Result<T, E = VaultError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// The submitted proof does not authorise the requested transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    /// Proof bytes could not be decoded.
    #[error("malformed proof: {0}")]
    Malformed(String),

    /// Proof is bound to a different ciphertext, statement, operation or vault.
    #[error("statement mismatch: {reason}")]
    StatementMismatch {
        /// Which part of the binding disagreed.
        reason: String,
    },

    /// Proof is bound to someone other than the acting owner.
    #[error("proof is bound to owner {bound_to}, not {expected}")]
    OwnershipMismatch {
        expected: String,
        bound_to: String,
    },

    /// Binding is from an old epoch or past its expiry.
    #[error("expired proof binding: {reason}")]
    ExpiredBinding { reason: String },

    /// This proof has already authorised a committed transition.
    #[error("proof {digest} already consumed")]
    AlreadyConsumed {
        /// Hex digest of the consumed proof.
        digest: String,
    },

    /// The proof system rejected the proof.
    #[error("invalid proof")]
    InvalidProof,
}

/// The vault's lifecycle forbids the requested transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("{0} not found")]
    VaultNotFound(VaultId),

    #[error("{vault_id} is {status}, not active")]
    VaultNotActive {
        vault_id: VaultId,
        status: VaultStatus,
    },

    #[error("invalid transition from {from} via {via}")]
    InvalidTransition {
        from: VaultStatus,
        /// Name of the attempted transition.
        via: &'static str,
    },

    /// Liquidation was requested but the fresh re-check says the vault is fine.
    #[error("{0} is above the liquidation threshold")]
    VaultHealthy(VaultId),

    /// Close requested without a valid settlement attestation.
    #[error("{0} has no valid settlement attestation")]
    SettlementUnattested(VaultId),

    #[error("{initiator} may not liquidate vaults")]
    Unauthorized { initiator: Initiator },
}

/// No trustworthy price is available.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("stale price for {asset}: {age_secs}s old, limit {max_secs}s")]
    StaleOracleData {
        asset: AssetId,
        age_secs: i64,
        max_secs: i64,
    },

    #[error("price for {asset} unavailable: {reason}")]
    Unavailable { asset: AssetId, reason: String },

    /// A transition tried to mix two snapshots.
    #[error("inconsistent price snapshot: {reason}")]
    InconsistentSnapshot { reason: String },

    #[error("invalid quote for {asset}: {reason}")]
    InvalidQuote { asset: AssetId, reason: String },
}

/// Committing would break a solvency or arithmetic invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// The mint would push the vault below the minimum ratio.
    #[error("insufficient collateral in {0}")]
    InsufficientCollateral(VaultId),

    /// A tracked ciphertext bound would exceed the plaintext modulus.
    #[error("range overflow in {operation}")]
    RangeOverflow { operation: &'static str },

    #[error("zero collateral rejected")]
    ZeroCollateralRejected,

    #[error("scheme mismatch: expected {expected}, found {found}")]
    SchemeMismatch { expected: String, found: String },

    /// A ciphertext of the right scheme failed to open inside the backend.
    #[error("corrupt ciphertext: {reason}")]
    CorruptCiphertext { reason: String },

    /// A boolean attestation did not verify against the trusted key.
    #[error("unverified attestation: {reason}")]
    UnverifiedAttestation { reason: String },
}

/// A dependency failed in a way that may resolve itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransientError {
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: &'static str, after_ms: u64 },

    #[error("{operation} backend failure: {reason}")]
    Backend { operation: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// VaultError
// ---------------------------------------------------------------------------

/// Top-level engine error.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    Transient(#[from] TransientError),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl VaultError {
    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short category label for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Proof(_) => "proof",
            Self::State(_) => "state",
            Self::Oracle(_) => "oracle",
            Self::Invariant(_) => "invariant",
            Self::Transient(_) => "transient",
            Self::Storage(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        let timeout: VaultError = TransientError::Timeout {
            operation: "oracle.fetch",
            after_ms: 2_000,
        }
        .into();
        assert!(timeout.is_retryable());
        assert_eq!(timeout.category(), "transient");

        let consumed: VaultError = ProofError::AlreadyConsumed { digest: "ab".into() }.into();
        assert!(!consumed.is_retryable());
        assert_eq!(consumed.category(), "proof");

        let short: VaultError = InvariantViolation::InsufficientCollateral(VaultId(1)).into();
        assert!(!short.is_retryable());
    }

    #[test]
    fn messages_name_the_vault() {
        let err = StateError::VaultNotActive {
            vault_id: VaultId(7),
            status: VaultStatus::Liquidating,
        };
        assert_eq!(err.to_string(), "vault#7 is liquidating, not active");
    }
}
