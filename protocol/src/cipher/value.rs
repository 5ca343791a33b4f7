//! Ciphertext containers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{domain_digest, Digest, ATTESTATION_CONTEXT, CIPHERTEXT_CONTEXT};
use crate::crypto::keys::AttestorSignature;

/// Names the homomorphic scheme a ciphertext belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemeTag(String);

impl SchemeTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An encrypted amount.
///
/// The bytes are opaque. `bound` is public metadata: the largest plaintext
/// this ciphertext can possibly hold, derived from the proof that admitted
/// it and from the operations applied since. It never comes from the
/// plaintext itself, so publishing it reveals nothing a proof didn't.
///
/// Values are immutable; every operation returns a fresh ciphertext.
/// Equality is ciphertext identity, not plaintext equality: two encryptions
/// of the same amount are different values.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    scheme: SchemeTag,
    version: u16,
    bound: u128,
    bytes: Vec<u8>,
}

impl EncryptedValue {
    pub fn new(scheme: SchemeTag, version: u16, bound: u128, bytes: Vec<u8>) -> Self {
        Self { scheme, version, bound, bytes }
    }

    pub fn scheme(&self) -> &SchemeTag {
        &self.scheme
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn bound(&self) -> u128 {
        self.bound
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Replace the tracked bound. Used when a proof attests a bound for an
    /// externally supplied ciphertext, whose self-declared bound is not
    /// trusted.
    pub fn with_bound(mut self, bound: u128) -> Self {
        self.bound = bound;
        self
    }

    /// BLAKE3 identity over `(scheme, version, bytes)`. The bound is
    /// deliberately excluded: re-bounding a value does not change which
    /// ciphertext it is.
    pub fn digest(&self) -> Digest {
        domain_digest(
            CIPHERTEXT_CONTEXT,
            &[self.scheme.as_str().as_bytes(), &self.version.to_le_bytes(), &self.bytes],
        )
    }
}

impl fmt::Debug for EncryptedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedValue")
            .field("scheme", &self.scheme.as_str())
            .field("version", &self.version)
            .field("bound", &self.bound)
            .field("digest", &self.digest())
            .finish()
    }
}

/// The sealed result of a comparison or zero test.
///
/// Carries the digest of the request that produced it so an attestation for
/// one comparison can't be replayed as the answer to another.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBool {
    bytes: Vec<u8>,
    request: Digest,
}

impl EncryptedBool {
    pub fn new(bytes: Vec<u8>, request: Digest) -> Self {
        Self { bytes, request }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn request(&self) -> Digest {
        self.request
    }

    pub fn digest(&self) -> Digest {
        domain_digest(CIPHERTEXT_CONTEXT, &[b"bool", &self.bytes])
    }
}

impl fmt::Debug for EncryptedBool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedBool({}, request={})", self.digest().short(), self.request.short())
    }
}

/// A signed statement that a specific [`EncryptedBool`] decrypts to `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolAttestation {
    pub value: bool,
    /// Digest of the attested `EncryptedBool`.
    pub subject: Digest,
    /// Request digest copied from the `EncryptedBool`.
    pub request: Digest,
    pub signature: AttestorSignature,
}

impl BoolAttestation {
    /// The bytes the co-processor signs.
    pub fn message(value: bool, subject: &Digest, request: &Digest) -> Digest {
        domain_digest(
            ATTESTATION_CONTEXT,
            &[&[u8::from(value)], subject.as_bytes(), request.as_bytes()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(bytes: &[u8]) -> EncryptedValue {
        EncryptedValue::new(SchemeTag::new("test"), 1, 100, bytes.to_vec())
    }

    #[test]
    fn digest_ignores_bound() {
        let v = value(b"ct");
        assert_eq!(v.digest(), v.clone().with_bound(5).digest());
    }

    #[test]
    fn digest_covers_scheme_and_version() {
        let a = value(b"ct");
        let b = EncryptedValue::new(SchemeTag::new("other"), 1, 100, b"ct".to_vec());
        let c = EncryptedValue::new(SchemeTag::new("test"), 2, 100, b"ct".to_vec());
        assert_ne!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn debug_does_not_dump_bytes() {
        let v = value(&[0xAB; 40]);
        assert!(!format!("{v:?}").contains("abababab"));
    }
}
