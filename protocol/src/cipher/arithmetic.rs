//! # Arithmetic Unit
//!
//! The ledger's only door into the homomorphic scheme. It adds the checks a
//! scheme can't be trusted to make on its own:
//!
//! - **Scheme isolation**: a ciphertext from any other scheme or version is
//!   rejected with `SchemeMismatch` before the backend sees it.
//! - **Bound tracking**: every result carries a public upper bound on its
//!   plaintext (`bound(a+b) = bound(a)+bound(b)`, `bound(a·p) =
//!   ⌊bound(a)·bound(p)/PRICE_SCALE⌋`). If a bound would leave `u128`, the
//!   operation fails with `RangeOverflow` instead of silently wrapping
//!   modulo 2^128.
//! - **Attested evaluation**: a sealed boolean becomes a `bool` only after
//!   its attestation verifies against the configured co-processor key and
//!   names that exact ciphertext and request.

use std::sync::Arc;

use tracing::debug;

use crate::cipher::fixed_point::mul_div_floor;
use crate::cipher::value::{EncryptedBool, EncryptedValue, SchemeTag};
use crate::cipher::{HomomorphicScheme, Price, RatioGate, SchemeError};
use crate::config::PRICE_SCALE;
use crate::crypto::keys::AttestorPublicKey;
use crate::error::{InvariantViolation, Result, TransientError, VaultError};

#[derive(Debug, Clone)]
pub struct ArithmeticUnit {
    scheme: Arc<dyn HomomorphicScheme>,
    trusted: AttestorPublicKey,
}

impl ArithmeticUnit {
    /// Wrap `scheme`, trusting boolean attestations signed by `trusted`.
    pub fn new(scheme: Arc<dyn HomomorphicScheme>, trusted: AttestorPublicKey) -> Self {
        Self { scheme, trusted }
    }

    pub fn scheme_tag(&self) -> &SchemeTag {
        self.scheme.tag()
    }

    pub fn scheme_version(&self) -> u16 {
        self.scheme.version()
    }

    /// Whether `value` belongs to this unit's scheme.
    pub fn supports(&self, value: &EncryptedValue) -> bool {
        value.scheme() == self.scheme.tag() && value.version() == self.scheme.version()
    }

    pub fn encrypt_zero(&self) -> Result<EncryptedValue> {
        self.scheme
            .encrypt_zero()
            .map_err(|e| scheme_error("encrypt_zero", e))
    }

    pub fn add(&self, a: &EncryptedValue, b: &EncryptedValue) -> Result<EncryptedValue> {
        self.check(a)?;
        self.check(b)?;
        let bound = a
            .bound()
            .checked_add(b.bound())
            .ok_or(InvariantViolation::RangeOverflow { operation: "add" })?;
        let sum = self.scheme.add(a, b).map_err(|e| scheme_error("add", e))?;
        Ok(sum.with_bound(bound))
    }

    pub fn scale_by_price(&self, amount: &EncryptedValue, price: &Price) -> Result<EncryptedValue> {
        self.check(amount)?;
        if let Price::Sealed(p) = price {
            self.check(p)?;
        }
        let bound = mul_div_floor(amount.bound(), price.bound(), PRICE_SCALE)
            .ok_or(InvariantViolation::RangeOverflow { operation: "scale_by_price" })?;
        let scaled = self
            .scheme
            .scale_by_price(amount, price)
            .map_err(|e| scheme_error("scale_by_price", e))?;
        Ok(scaled.with_bound(bound))
    }

    /// Fail with `RangeOverflow` unless `amount` could still be valued at
    /// any price up to `max_price`. Collateral that passes can always be
    /// priced, so its vault can always be liquidated.
    pub fn ensure_valuable(
        &self,
        amount: &EncryptedValue,
        max_price: u128,
        operation: &'static str,
    ) -> Result<()> {
        match mul_div_floor(amount.bound(), max_price, PRICE_SCALE) {
            Some(_) => Ok(()),
            None => Err(InvariantViolation::RangeOverflow { operation }.into()),
        }
    }

    /// Sealed `a · 10⁴ ≥ b · ratio_bps`.
    pub fn compare_ge(
        &self,
        a: &EncryptedValue,
        b: &EncryptedValue,
        ratio_bps: u32,
    ) -> Result<EncryptedBool> {
        self.compare(a, b, ratio_bps, RatioGate::AtLeast)
    }

    /// Sealed `a · 10⁴ > b · ratio_bps` (`b == 0` is always above).
    pub fn compare_gt(
        &self,
        a: &EncryptedValue,
        b: &EncryptedValue,
        ratio_bps: u32,
    ) -> Result<EncryptedBool> {
        self.compare(a, b, ratio_bps, RatioGate::Above)
    }

    pub fn is_zero(&self, a: &EncryptedValue) -> Result<EncryptedBool> {
        self.check(a)?;
        self.scheme.is_zero(a).map_err(|e| scheme_error("is_zero", e))
    }

    /// Resolve a sealed boolean through a verified attestation.
    pub fn evaluate(&self, b: &EncryptedBool) -> Result<bool> {
        let att = self.scheme.attest(b).map_err(|e| scheme_error("attest", e))?;
        if att.subject != b.digest() || att.request != b.request() {
            return Err(InvariantViolation::UnverifiedAttestation {
                reason: "attestation names a different ciphertext".into(),
            }
            .into());
        }
        let message = crate::cipher::BoolAttestation::message(att.value, &att.subject, &att.request);
        if !self.trusted.verify(message.as_bytes(), &att.signature) {
            return Err(InvariantViolation::UnverifiedAttestation {
                reason: format!("signature does not verify against {}", self.trusted),
            }
            .into());
        }
        debug!(subject = %att.subject.short(), value = att.value, "attested boolean");
        Ok(att.value)
    }

    fn compare(
        &self,
        a: &EncryptedValue,
        b: &EncryptedValue,
        ratio_bps: u32,
        gate: RatioGate,
    ) -> Result<EncryptedBool> {
        self.check(a)?;
        self.check(b)?;
        self.scheme
            .compare_ratio(a, b, ratio_bps, gate)
            .map_err(|e| scheme_error("compare_ratio", e))
    }

    fn check(&self, value: &EncryptedValue) -> Result<()> {
        if self.supports(value) {
            return Ok(());
        }
        Err(InvariantViolation::SchemeMismatch {
            expected: format!("{}/v{}", self.scheme.tag(), self.scheme.version()),
            found: format!("{}/v{}", value.scheme(), value.version()),
        }
        .into())
    }
}

fn scheme_error(operation: &'static str, err: SchemeError) -> VaultError {
    match err {
        SchemeError::Overflow | SchemeError::InputTooWide { .. } => {
            InvariantViolation::RangeOverflow { operation }.into()
        }
        SchemeError::Malformed(reason) => InvariantViolation::CorruptCiphertext { reason }.into(),
        SchemeError::Backend(reason) => TransientError::Backend { operation, reason }.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::coprocessor::SealedCoprocessor;
    use crate::cipher::fixed_point::{price_units, units};
    use crate::crypto::keys::AttestorKeypair;

    fn unit() -> (Arc<SealedCoprocessor>, ArithmeticUnit) {
        let cp = Arc::new(SealedCoprocessor::generate());
        let au = ArithmeticUnit::new(cp.clone(), cp.public_key());
        (cp, au)
    }

    #[test]
    fn bounds_accumulate() {
        let (cp, au) = unit();
        let a = cp.encrypt_input(1).unwrap().with_bound(10);
        let b = cp.encrypt_input(2).unwrap().with_bound(20);
        let sum = au.add(&a, &b).unwrap();
        assert_eq!(sum.bound(), 30);
        assert_eq!(cp.reveal_for_audit(&sum).unwrap(), 3);
    }

    #[test]
    fn bound_overflow_is_refused() {
        let (cp, au) = unit();
        let a = cp.encrypt_input(1).unwrap().with_bound(u128::MAX);
        let b = cp.encrypt_input(1).unwrap();
        assert!(matches!(
            au.add(&a, &b),
            Err(VaultError::Invariant(InvariantViolation::RangeOverflow { operation: "add" }))
        ));
    }

    #[test]
    fn scaled_bound_follows_price() {
        let (cp, au) = unit();
        let amount = cp.encrypt_input(units(1).unwrap()).unwrap().with_bound(units(2).unwrap());
        let scaled = au
            .scale_by_price(&amount, &Price::Plain(price_units(3_000).unwrap()))
            .unwrap();
        assert_eq!(scaled.bound(), units(6_000).unwrap());
    }

    #[test]
    fn valuation_headroom_follows_the_price_cap() {
        let (cp, au) = unit();
        let cap = price_units(10_000_000).unwrap();
        let ok = cp.encrypt_input(1).unwrap().with_bound(u128::MAX / cap);
        au.ensure_valuable(&ok, cap, "test").unwrap();
        au.scale_by_price(&ok, &Price::Plain(cap)).unwrap();

        let wide = cp.encrypt_input(1).unwrap().with_bound(u128::MAX / 2);
        assert!(matches!(
            au.ensure_valuable(&wide, cap, "test"),
            Err(VaultError::Invariant(InvariantViolation::RangeOverflow { operation: "test" }))
        ));
    }

    #[test]
    fn sealed_price_scales_by_its_bound() {
        let (cp, au) = unit();
        let amount = cp.encrypt_input(units(2).unwrap()).unwrap().with_bound(units(2).unwrap());
        let price = cp
            .encrypt_price(price_units(3_000).unwrap(), price_units(5_000).unwrap())
            .unwrap();
        let value = au.scale_by_price(&amount, &Price::Sealed(price)).unwrap();
        assert_eq!(value.bound(), units(10_000).unwrap());
        assert_eq!(cp.reveal_for_audit(&value).unwrap(), units(6_000).unwrap());
    }

    #[test]
    fn foreign_scheme_is_rejected() {
        let (_, au) = unit();
        let foreign = EncryptedValue::new(SchemeTag::new("tfhe"), 1, 1, vec![0; 32]);
        let zero = au.encrypt_zero().unwrap();
        assert!(matches!(
            au.add(&zero, &foreign),
            Err(VaultError::Invariant(InvariantViolation::SchemeMismatch { .. }))
        ));
    }

    #[test]
    fn evaluation_requires_trusted_key() {
        let cp = Arc::new(SealedCoprocessor::generate());
        let untrusting = ArithmeticUnit::new(cp.clone(), AttestorKeypair::generate().public_key());
        let zero = untrusting.encrypt_zero().unwrap();
        let b = untrusting.is_zero(&zero).unwrap();
        assert!(matches!(
            untrusting.evaluate(&b),
            Err(VaultError::Invariant(InvariantViolation::UnverifiedAttestation { .. }))
        ));

        let trusting = ArithmeticUnit::new(cp.clone(), cp.public_key());
        assert!(trusting.evaluate(&b).unwrap());
    }

    #[test]
    fn ge_and_gt_differ_at_equality() {
        let (cp, au) = unit();
        let value = cp.encrypt_input(units(1_300).unwrap()).unwrap();
        let debt = cp.encrypt_input(units(1_000).unwrap()).unwrap();
        assert!(au.evaluate(&au.compare_ge(&value, &debt, 13_000).unwrap()).unwrap());
        assert!(!au.evaluate(&au.compare_gt(&value, &debt, 13_000).unwrap()).unwrap());
    }
}
