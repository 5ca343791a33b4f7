//! # Cryptographic Primitives
//!
//! Thin, typed wrappers over audited implementations:
//!
//! - **AES-256-GCM** seals amounts inside the co-processor.
//! - **Ed25519** signs attestations (booleans, proof bindings, settlements).
//! - **BLAKE3** identifies ciphertexts, bindings and proofs.
//!
//! Nothing here is clever, and nothing here should become clever.

pub mod encryption;
pub mod hash;
pub mod keys;

pub use encryption::{generate_key, open, seal, EncryptionError};
pub use hash::{domain_digest, Digest};
pub use keys::{AttestorKeypair, AttestorPublicKey, AttestorSignature, KeyError};
