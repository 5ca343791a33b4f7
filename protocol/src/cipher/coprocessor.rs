//! # Sealed Co-processor
//!
//! A [`HomomorphicScheme`] backed by a trusted co-processor: amounts are
//! AES-256-GCM sealed under a key only the co-processor holds, operations
//! open their inputs inside the co-processor, compute exactly on `u128`,
//! and re-seal the result under a fresh nonce. Comparison results leave as
//! sealed booleans and are only revealed through Ed25519 attestations.
//!
//! Outside this module nothing can distinguish it from a real FHE backend,
//! which is the point: the ledger is written against the trait.
//!
//! The associated data of every seal is `(scheme tag, version, kind)`, so a
//! sealed boolean can't be passed off as an amount, and ciphertexts from
//! another scheme version fail to open.

use crate::cipher::fixed_point::{mul_div_floor, ratio_holds};
use crate::cipher::value::{BoolAttestation, EncryptedBool, EncryptedValue, SchemeTag};
use crate::cipher::{HomomorphicScheme, Price, RatioGate, SchemeError};
use crate::config::{AES_KEY_LENGTH, INPUT_BITS, MAX_INPUT_VALUE, PRICE_SCALE};
use crate::crypto::encryption::{generate_key, open, seal};
use crate::crypto::hash::{domain_digest, Digest};
use crate::crypto::keys::{AttestorKeypair, AttestorPublicKey};

/// Scheme tag of co-processor ciphertexts.
pub const SCHEME_NAME: &str = "aes256gcm-coprocessor";

pub const SCHEME_VERSION: u16 = 1;

const REQUEST_CONTEXT: &str = "shieldmint 2026 coprocessor request";

const KIND_AMOUNT: &[u8] = b"u128";
const KIND_BOOL: &[u8] = b"bool";

/// The co-processor: sealing key plus attestation key.
pub struct SealedCoprocessor {
    tag: SchemeTag,
    key: [u8; AES_KEY_LENGTH],
    attestor: AttestorKeypair,
}

impl SealedCoprocessor {
    pub fn new(key: [u8; AES_KEY_LENGTH], attestor: AttestorKeypair) -> Self {
        Self {
            tag: SchemeTag::new(SCHEME_NAME),
            key,
            attestor,
        }
    }

    /// A co-processor with freshly generated keys.
    pub fn generate() -> Self {
        Self::new(generate_key(), AttestorKeypair::generate())
    }

    /// The key its boolean attestations verify against.
    pub fn public_key(&self) -> AttestorPublicKey {
        self.attestor.public_key()
    }

    /// Client-side encryption of an input amount.
    ///
    /// The published bound is the full input width, not the amount. It's the
    /// accompanying proof that tightens it.
    pub fn encrypt_input(&self, amount: u128) -> Result<EncryptedValue, SchemeError> {
        if amount > MAX_INPUT_VALUE {
            return Err(SchemeError::InputTooWide { bits: INPUT_BITS });
        }
        self.seal_amount(amount, MAX_INPUT_VALUE)
    }

    /// Seal a price for confidential valuation. `bound` is the public cap the
    /// oracle enforces on quotes.
    pub fn encrypt_price(&self, price: u128, bound: u128) -> Result<EncryptedValue, SchemeError> {
        if price > bound {
            return Err(SchemeError::Overflow);
        }
        self.seal_amount(price, bound)
    }

    /// Decrypt a value. Only for audits and test harnesses; the engine never
    /// calls this.
    pub fn reveal_for_audit(&self, value: &EncryptedValue) -> Result<u128, SchemeError> {
        self.open_amount(value)
    }

    pub(crate) fn open_amount(&self, value: &EncryptedValue) -> Result<u128, SchemeError> {
        self.check_tag(value)?;
        let plain = open(&self.key, value.bytes(), &self.aad(KIND_AMOUNT))
            .map_err(|e| SchemeError::Malformed(e.to_string()))?;
        let bytes: [u8; 16] = plain
            .as_slice()
            .try_into()
            .map_err(|_| SchemeError::Malformed(format!("{} plaintext bytes", plain.len())))?;
        Ok(u128::from_le_bytes(bytes))
    }

    fn seal_amount(&self, amount: u128, bound: u128) -> Result<EncryptedValue, SchemeError> {
        let bytes = seal(&self.key, &amount.to_le_bytes(), &self.aad(KIND_AMOUNT))
            .map_err(|e| SchemeError::Backend(e.to_string()))?;
        Ok(EncryptedValue::new(self.tag.clone(), SCHEME_VERSION, bound, bytes))
    }

    fn seal_bool(&self, value: bool, request: Digest) -> Result<EncryptedBool, SchemeError> {
        let bytes = seal(&self.key, &[u8::from(value)], &self.aad(KIND_BOOL))
            .map_err(|e| SchemeError::Backend(e.to_string()))?;
        Ok(EncryptedBool::new(bytes, request))
    }

    fn open_bool(&self, b: &EncryptedBool) -> Result<bool, SchemeError> {
        let plain = open(&self.key, b.bytes(), &self.aad(KIND_BOOL))
            .map_err(|e| SchemeError::Malformed(e.to_string()))?;
        match plain.as_slice() {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(SchemeError::Malformed("not a sealed boolean".into())),
        }
    }

    fn open_price(&self, price: &Price) -> Result<u128, SchemeError> {
        match price {
            Price::Plain(p) => Ok(*p),
            Price::Sealed(v) => self.open_amount(v),
        }
    }

    fn check_tag(&self, value: &EncryptedValue) -> Result<(), SchemeError> {
        if value.scheme() != &self.tag || value.version() != SCHEME_VERSION {
            return Err(SchemeError::Malformed(format!(
                "foreign ciphertext {}/v{}",
                value.scheme(),
                value.version()
            )));
        }
        Ok(())
    }

    fn aad(&self, kind: &[u8]) -> Vec<u8> {
        let mut aad = Vec::with_capacity(self.tag.as_str().len() + 2 + kind.len());
        aad.extend_from_slice(self.tag.as_str().as_bytes());
        aad.extend_from_slice(&SCHEME_VERSION.to_le_bytes());
        aad.extend_from_slice(kind);
        aad
    }
}

impl std::fmt::Debug for SealedCoprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedCoprocessor")
            .field("tag", &self.tag.as_str())
            .field("attestor", &self.attestor.public_key())
            .finish_non_exhaustive()
    }
}

impl HomomorphicScheme for SealedCoprocessor {
    fn tag(&self) -> &SchemeTag {
        &self.tag
    }

    fn version(&self) -> u16 {
        SCHEME_VERSION
    }

    fn encrypt_zero(&self) -> Result<EncryptedValue, SchemeError> {
        self.seal_amount(0, 0)
    }

    fn add(&self, a: &EncryptedValue, b: &EncryptedValue) -> Result<EncryptedValue, SchemeError> {
        let sum = self
            .open_amount(a)?
            .checked_add(self.open_amount(b)?)
            .ok_or(SchemeError::Overflow)?;
        let bound = a.bound().saturating_add(b.bound());
        self.seal_amount(sum, bound)
    }

    fn scale_by_price(
        &self,
        amount: &EncryptedValue,
        price: &Price,
    ) -> Result<EncryptedValue, SchemeError> {
        let value = mul_div_floor(self.open_amount(amount)?, self.open_price(price)?, PRICE_SCALE)
            .ok_or(SchemeError::Overflow)?;
        let bound = mul_div_floor(amount.bound(), price.bound(), PRICE_SCALE).unwrap_or(u128::MAX);
        self.seal_amount(value, bound)
    }

    fn compare_ratio(
        &self,
        a: &EncryptedValue,
        b: &EncryptedValue,
        ratio_bps: u32,
        gate: RatioGate,
    ) -> Result<EncryptedBool, SchemeError> {
        let holds = ratio_holds(self.open_amount(a)?, self.open_amount(b)?, ratio_bps, gate);
        let request = domain_digest(
            REQUEST_CONTEXT,
            &[
                b"compare_ratio",
                a.digest().as_bytes(),
                b.digest().as_bytes(),
                &ratio_bps.to_le_bytes(),
                &[gate.tag()],
            ],
        );
        self.seal_bool(holds, request)
    }

    fn is_zero(&self, a: &EncryptedValue) -> Result<EncryptedBool, SchemeError> {
        let zero = self.open_amount(a)? == 0;
        let request = domain_digest(REQUEST_CONTEXT, &[b"is_zero", a.digest().as_bytes()]);
        self.seal_bool(zero, request)
    }

    fn attest(&self, b: &EncryptedBool) -> Result<BoolAttestation, SchemeError> {
        let value = self.open_bool(b)?;
        let subject = b.digest();
        let request = b.request();
        let message = BoolAttestation::message(value, &subject, &request);
        Ok(BoolAttestation {
            value,
            subject,
            request,
            signature: self.attestor.sign(message.as_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::fixed_point::{price_units, units};

    #[test]
    fn encryptions_are_randomised() {
        let cp = SealedCoprocessor::generate();
        let a = cp.encrypt_input(5).unwrap();
        let b = cp.encrypt_input(5).unwrap();
        assert_ne!(a.bytes(), b.bytes());
        assert_eq!(cp.reveal_for_audit(&a).unwrap(), cp.reveal_for_audit(&b).unwrap());
    }

    #[test]
    fn oversized_input_is_refused() {
        let cp = SealedCoprocessor::generate();
        assert_eq!(
            cp.encrypt_input(MAX_INPUT_VALUE + 1),
            Err(SchemeError::InputTooWide { bits: INPUT_BITS })
        );
    }

    #[test]
    fn add_and_scale() {
        let cp = SealedCoprocessor::generate();
        let a = cp.encrypt_input(units(1).unwrap()).unwrap();
        let b = cp.encrypt_input(units(1).unwrap() / 2).unwrap();
        let sum = cp.add(&a, &b).unwrap();
        assert_eq!(cp.reveal_for_audit(&sum).unwrap(), units(1).unwrap() * 3 / 2);

        let value = cp.scale_by_price(&sum, &Price::Plain(price_units(3_000).unwrap())).unwrap();
        assert_eq!(cp.reveal_for_audit(&value).unwrap(), units(4_500).unwrap());
    }

    #[test]
    fn sealed_price_scales_like_plain() {
        let cp = SealedCoprocessor::generate();
        let amount = cp.encrypt_input(units(2).unwrap()).unwrap();
        let price = cp.encrypt_price(price_units(3_000).unwrap(), price_units(10_000).unwrap()).unwrap();
        let value = cp.scale_by_price(&amount, &Price::Sealed(price)).unwrap();
        assert_eq!(cp.reveal_for_audit(&value).unwrap(), units(6_000).unwrap());
    }

    #[test]
    fn attested_comparison() {
        let cp = SealedCoprocessor::generate();
        let value = cp.encrypt_input(units(3_000).unwrap()).unwrap();
        let debt = cp.encrypt_input(units(2_000).unwrap()).unwrap();
        let gate = cp.compare_ratio(&value, &debt, 15_000, RatioGate::AtLeast).unwrap();
        let att = cp.attest(&gate).unwrap();
        assert!(att.value);
        assert_eq!(att.subject, gate.digest());
        let msg = BoolAttestation::message(att.value, &att.subject, &att.request);
        assert!(cp.public_key().verify(msg.as_bytes(), &att.signature));
    }

    #[test]
    fn foreign_key_cannot_open() {
        let a = SealedCoprocessor::generate();
        let b = SealedCoprocessor::generate();
        let ct = a.encrypt_input(1).unwrap();
        assert!(matches!(b.reveal_for_audit(&ct), Err(SchemeError::Malformed(_))));
    }

    #[test]
    fn bool_cannot_be_read_as_amount() {
        let cp = SealedCoprocessor::generate();
        let zero = cp.encrypt_zero().unwrap();
        let b = cp.is_zero(&zero).unwrap();
        let forged = EncryptedValue::new(SchemeTag::new(SCHEME_NAME), SCHEME_VERSION, 1, b.bytes().to_vec());
        assert!(cp.reveal_for_audit(&forged).is_err());
        assert!(cp.attest(&b).unwrap().value);
    }
}
