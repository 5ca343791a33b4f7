//! # Homomorphic Arithmetic
//!
//! Collateral and debt are never decrypted by the engine. Everything the
//! ledger needs to know about them (sums, valuations at a price, whether a
//! ratio holds, whether a deposit is zero) is computed over ciphertexts by a
//! [`HomomorphicScheme`], and booleans come back sealed. The only way to
//! turn a sealed boolean into a `bool` the ledger can branch on is an
//! Ed25519 attestation from the scheme's trusted key, checked by the
//! [`ArithmeticUnit`].
//!
//! ```text
//!   EncryptedValue ──► ArithmeticUnit ──► HomomorphicScheme (co-processor)
//!                        │  scheme check        │
//!                        │  bound tracking      ▼
//!                        │                EncryptedBool
//!                        └── evaluate ◄── BoolAttestation (Ed25519)
//! ```
//!
//! The scheme is a capability: the bundled [`SealedCoprocessor`] seals
//! amounts with AES-256-GCM and computes inside its own trust boundary, but a
//! real FHE library can implement the same trait without the ledger
//! noticing.

pub mod arithmetic;
pub mod coprocessor;
pub mod fixed_point;
pub mod value;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use arithmetic::ArithmeticUnit;
pub use coprocessor::SealedCoprocessor;
pub use value::{BoolAttestation, EncryptedBool, EncryptedValue, SchemeTag};

/// How a ratio comparison treats equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RatioGate {
    /// `a · 10⁴ ≥ b · r`. The minting gate.
    AtLeast,
    /// `a · 10⁴ > b · r`, with `b == 0` always above. The health gate: a
    /// vault that fails it is liquidatable.
    Above,
}

impl RatioGate {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::AtLeast => 0,
            Self::Above => 1,
        }
    }
}

/// A collateral price, public or sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Price {
    /// `PRICE_SCALE` fixed point.
    Plain(u128),
    /// A price kept confidential by its feed. The bundled oracle publishes
    /// `Plain` prices; `Sealed` serves feeds that never reveal theirs. The
    /// arithmetic unit tracks either through [`Price::bound`], so vault
    /// valuation is identical for both.
    Sealed(EncryptedValue),
}

impl Price {
    /// Largest value the price can take.
    pub fn bound(&self) -> u128 {
        match self {
            Self::Plain(p) => *p,
            Self::Sealed(v) => v.bound(),
        }
    }
}

/// Failures reported by a scheme backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemeError {
    /// The ciphertext does not open under this scheme's key.
    #[error("ciphertext does not decode: {0}")]
    Malformed(String),

    /// The exact result does not fit the plaintext modulus.
    #[error("plaintext overflow")]
    Overflow,

    /// The input is wider than `INPUT_BITS`.
    #[error("input exceeds {bits}-bit input width")]
    InputTooWide { bits: u32 },

    /// The backend itself failed (remote co-processor down, etc.).
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Homomorphic operations over encrypted amounts.
///
/// Implementations are pure with respect to the engine: no operation mutates
/// its inputs, and each returns a freshly randomised ciphertext.
pub trait HomomorphicScheme: Send + Sync + fmt::Debug {
    /// Tag stamped on every ciphertext this scheme produces.
    fn tag(&self) -> &SchemeTag;

    fn version(&self) -> u16;

    fn encrypt_zero(&self) -> Result<EncryptedValue, SchemeError>;

    fn add(&self, a: &EncryptedValue, b: &EncryptedValue) -> Result<EncryptedValue, SchemeError>;

    /// `⌊amount · price / PRICE_SCALE⌋`.
    fn scale_by_price(
        &self,
        amount: &EncryptedValue,
        price: &Price,
    ) -> Result<EncryptedValue, SchemeError>;

    /// Seal the result of `a · 10⁴ ⋈ b · ratio_bps` (see [`RatioGate`]).
    fn compare_ratio(
        &self,
        a: &EncryptedValue,
        b: &EncryptedValue,
        ratio_bps: u32,
        gate: RatioGate,
    ) -> Result<EncryptedBool, SchemeError>;

    fn is_zero(&self, a: &EncryptedValue) -> Result<EncryptedBool, SchemeError>;

    /// Sign the plaintext of a sealed boolean.
    fn attest(&self, b: &EncryptedBool) -> Result<BoolAttestation, SchemeError>;
}
