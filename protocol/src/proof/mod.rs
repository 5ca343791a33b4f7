//! # Proofs
//!
//! Every encrypted amount that enters the ledger arrives with a proof: a
//! public [`ProofBinding`] saying exactly which ciphertext, statement, owner,
//! operation and vault it covers, plus an opaque body for the proof system.
//! The [`Verifier`] checks the binding and asks the [`ProofSystem`] about the
//! body; success yields a single-use [`CapabilityToken`] that the ledger
//! redeems against the [`ConsumedProofs`] registry when it commits.

pub mod attested;
pub mod registry;
pub mod statement;
pub mod verifier;

pub use attested::{AttestError, AttestedProofSystem, InputAttestor};
pub use registry::{ConsumedEntry, ConsumedProofs, Redemption};
pub use statement::{Proof, ProofBinding, ProofContext, Statement};
pub use verifier::{CapabilityToken, ProofSystem, ProofSystemError, Verifier, VerifyScope};
