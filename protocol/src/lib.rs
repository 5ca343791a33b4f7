// Copyright (c) 2026 ShieldMint Contributors. MIT License.
// See LICENSE for details.

//! # ShieldMint: Confidential Vault Engine
//!
//! ShieldMint lets an owner lock collateral and mint the FUSD stablecoin
//! against it without ever putting a balance on the ledger in the clear.
//! Collateral and debt are ciphertexts. Every number a user submits comes
//! with a proof that it is in range and bound to that exact transition.
//! Solvency checks run homomorphically and come back as attested sealed
//! booleans.
//!
//! ## Architecture
//!
//! - **cipher**: ciphertext types, the `HomomorphicScheme` capability, the
//!   bound-checking arithmetic unit, and the sealed co-processor backend.
//! - **proof**: statements, bindings, the verifier, and the consumed-proof
//!   registry that makes every proof single-use.
//! - **oracle**: validated, cached, fresh prices.
//! - **ledger**: the vault state machine and its transitions.
//! - **monitor**: the background liquidation sweep.
//! - **storage**: sled persistence for vaults and consumed proofs.
//! - **engine**: wiring for a self-contained devnet engine.
//! - **config**, **error**, **retry**, **clock**, **types**: the plumbing.
//!
//! ## Ground rules
//!
//! 1. No plaintext amount is ever authoritative.
//! 2. Nothing defaults to "allow". A timeout is a failure, not a pass.
//! 3. One transition per vault at a time; many vaults at once.
//! 4. A transition either commits entirely or leaves no trace.

pub mod cipher;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod monitor;
pub mod oracle;
pub mod proof;
pub mod retry;
pub mod storage;
pub mod types;

pub use engine::{Engine, EngineKeys};
pub use error::{Result, VaultError};
pub use ledger::{GateOutcome, MintResult, VaultLedger};
pub use monitor::{LiquidationMonitor, SweepReport};
