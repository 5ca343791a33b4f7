//! # Attestor Keys
//!
//! Three parties sign things the engine has to trust:
//!
//! - the **co-processor**, which attests the booleans it computes over
//!   sealed amounts;
//! - the **input attestor**, which signs proof bindings;
//! - the **settlement authority**, which attests that a liquidated vault's
//!   debt has been fully settled.
//!
//! All three are plain Ed25519 keys. The engine only ever holds their
//! public halves, except in devnet and tests where the node generates them.
//!
//! Key bytes are never logged. `Debug` prints the public key only.

use std::fmt;

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SIGNATURE_LENGTH;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,
}

/// An Ed25519 signing key held by one of the attesting parties.
///
/// Intentionally not `Serialize`. Exporting secret material is an explicit
/// [`secret_key_bytes`](Self::secret_key_bytes) call.
pub struct AttestorKeypair {
    signing_key: SigningKey,
}

/// The public half, safe to put in config files and logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttestorPublicKey {
    bytes: [u8; 32],
}

/// A 64-byte Ed25519 signature. Stored as a `Vec` for serde; anything that
/// isn't 64 bytes simply fails verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestorSignature {
    bytes: Vec<u8>,
}

impl AttestorKeypair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Weak seed, weak key.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair from a hex-encoded secret key (devnet key files).
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    pub fn public_key(&self) -> AttestorPublicKey {
        AttestorPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> AttestorSignature {
        AttestorSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Raw secret key material. Handle with care; never log it.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key_bytes())
    }
}

impl Clone for AttestorKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for AttestorKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttestorKeypair(pub={})", self.public_key().to_hex())
    }
}

impl AttestorPublicKey {
    /// Parse and validate 32 raw bytes as an Ed25519 point.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// `true` iff `signature` is a valid signature of `message` by this key.
    pub fn verify(&self, message: &[u8], signature: &AttestorSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; SIGNATURE_LENGTH]>::try_from(signature.bytes.as_slice()) else {
            return false;
        };
        let sig = DalekSignature::from_bytes(&sig_bytes);
        verifying_key.verify(message, &sig).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for AttestorPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttestorPublicKey({})", self.to_hex())
    }
}

impl fmt::Display for AttestorPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AttestorSignature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl fmt::Debug for AttestorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = &self.bytes[..self.bytes.len().min(8)];
        write!(f, "AttestorSignature({}..)", hex::encode(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = AttestorKeypair::generate();
        let sig = kp.sign(b"vault#1 settled");
        assert!(kp.public_key().verify(b"vault#1 settled", &sig));
        assert!(!kp.public_key().verify(b"vault#2 settled", &sig));
    }

    #[test]
    fn other_key_rejects() {
        let sig = AttestorKeypair::generate().sign(b"msg");
        assert!(!AttestorKeypair::generate().public_key().verify(b"msg", &sig));
    }

    #[test]
    fn truncated_signature_fails_cleanly() {
        let kp = AttestorKeypair::generate();
        let mut bytes = kp.sign(b"msg").as_bytes().to_vec();
        bytes.truncate(10);
        assert!(!kp.public_key().verify(b"msg", &AttestorSignature::from_bytes(bytes)));
    }

    #[test]
    fn hex_roundtrip() {
        let kp = AttestorKeypair::generate();
        let restored = AttestorKeypair::from_hex(&kp.secret_key_hex()).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());
        let pk = AttestorPublicKey::from_hex(&kp.public_key().to_hex()).unwrap();
        assert_eq!(pk, kp.public_key());
    }

    #[test]
    fn debug_hides_secret() {
        let kp = AttestorKeypair::generate();
        let debug = format!("{kp:?}");
        assert!(!debug.contains(&kp.secret_key_hex()));
    }
}
