//! # Digests
//!
//! BLAKE3 everywhere. Proof bindings, ciphertext identities, consumed-proof
//! keys and attestation messages are all 32-byte BLAKE3 digests.
//!
//! Every digest that identifies a *kind* of thing uses BLAKE3's
//! `derive_key` mode with a context string, so a ciphertext digest can
//! never collide with a binding digest even over identical bytes.
//!
//! [`Digest`] compares in constant time. It is compared against
//! attacker-supplied values (proof bindings name the ciphertext they cover),
//! and a short-circuiting `==` on those would leak how many leading bytes
//! matched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DIGEST_LENGTH;

/// Domain tag for ciphertext identities.
pub const CIPHERTEXT_CONTEXT: &str = "shieldmint 2026 ciphertext digest";

/// Domain tag for proof bindings.
pub const BINDING_CONTEXT: &str = "shieldmint 2026 proof binding";

/// Domain tag for whole-proof digests (the consumed-proof key).
pub const PROOF_CONTEXT: &str = "shieldmint 2026 proof digest";

/// Domain tag for boolean attestations.
pub const ATTESTATION_CONTEXT: &str = "shieldmint 2026 bool attestation";

/// Domain tag for settlement attestations.
pub const SETTLEMENT_CONTEXT: &str = "shieldmint 2026 settlement";

/// A 32-byte BLAKE3 digest with constant-time equality.
#[derive(Clone, Copy, Hash, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl PartialEq for Digest {
    fn eq(&self, other: &Self) -> bool {
        // blake3::Hash implements constant-time equality.
        blake3::Hash::from(self.0) == blake3::Hash::from(other.0)
    }
}

impl Eq for Digest {}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Plain BLAKE3 of a single buffer.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Domain-separated digest over several parts, fed sequentially.
///
/// Each part is length-prefixed so that `("ab", "c")` and `("a", "bc")`
/// hash differently.
pub fn domain_digest(context: &str, parts: &[&[u8]]) -> Digest {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    Digest(*hasher.finalize().as_bytes())
}
