//! # Engine Assembly
//!
//! Wires the co-processor, proof system, verifier, oracle and ledger into a
//! working engine. The node uses this; so do the integration tests.
//!
//! ```text
//!                 ┌──────────────┐   attested bools   ┌────────────────┐
//!  InputAttestor ─► ProofSystem  │                    │ ArithmeticUnit │
//!   (client)      └──────┬───────┘                    └───────▲────────┘
//!                        │                                    │
//!                  ┌─────▼────┐    ┌─────────────┐    ┌───────┴───────┐
//!                  │ Verifier ├────► VaultLedger ◄────┤ PriceOracle   │
//!                  └──────────┘    └──────┬──────┘    └───────▲───────┘
//!                                         │                   │
//!                                      VaultDB         StaticPriceFeed
//! ```
//!
//! In devnet all four keys live in one [`EngineKeys`]. In a real deployment
//! the co-processor and the attestors run elsewhere and the engine only
//! holds public keys; [`VaultLedger::open`] takes exactly that.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cipher::{ArithmeticUnit, EncryptedValue, HomomorphicScheme, SealedCoprocessor};
use crate::clock::SharedClock;
use crate::config::{EngineConfig, AES_KEY_LENGTH};
use crate::crypto::encryption::generate_key;
use crate::crypto::keys::{AttestorKeypair, KeyError};
use crate::ledger::{LedgerDeps, SettlementAuthority, SettlementHandler, VaultLedger};
use crate::oracle::{PriceFeed, PriceOracle, StaticPriceFeed};
use crate::proof::{
    AttestError, AttestedProofSystem, ConsumedProofs, InputAttestor, ProofContext, Statement,
    Verifier,
};
use crate::storage::{DbResult, VaultDB};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Secret material for a self-contained devnet engine.
#[derive(Clone)]
pub struct EngineKeys {
    pub coprocessor_key: [u8; AES_KEY_LENGTH],
    pub coprocessor_attestor: AttestorKeypair,
    pub input_attestor: AttestorKeypair,
    pub settlement: AttestorKeypair,
}

/// Hex-encoded form of [`EngineKeys`], for the node's key file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineKeysFile {
    pub coprocessor_key: String,
    pub coprocessor_attestor: String,
    pub input_attestor: String,
    pub settlement: String,
}

impl EngineKeys {
    pub fn generate() -> Self {
        Self {
            coprocessor_key: generate_key(),
            coprocessor_attestor: AttestorKeypair::generate(),
            input_attestor: AttestorKeypair::generate(),
            settlement: AttestorKeypair::generate(),
        }
    }

    pub fn to_file(&self) -> EngineKeysFile {
        EngineKeysFile {
            coprocessor_key: hex::encode(self.coprocessor_key),
            coprocessor_attestor: self.coprocessor_attestor.secret_key_hex(),
            input_attestor: self.input_attestor.secret_key_hex(),
            settlement: self.settlement.secret_key_hex(),
        }
    }

    pub fn from_file(file: &EngineKeysFile) -> Result<Self, KeyError> {
        let coprocessor_key: [u8; AES_KEY_LENGTH] = hex::decode(&file.coprocessor_key)
            .map_err(|_| KeyError::InvalidSecretKey)?
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self {
            coprocessor_key,
            coprocessor_attestor: AttestorKeypair::from_hex(&file.coprocessor_attestor)?,
            input_attestor: AttestorKeypair::from_hex(&file.input_attestor)?,
            settlement: AttestorKeypair::from_hex(&file.settlement)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Engine {
    pub ledger: Arc<VaultLedger>,
    pub coprocessor: Arc<SealedCoprocessor>,
    pub attestor: Arc<InputAttestor>,
    pub feed: Arc<StaticPriceFeed>,
    pub oracle: Arc<PriceOracle>,
    pub settlement: SettlementAuthority,
    pub clock: SharedClock,
}

impl Engine {
    /// Assemble an engine over `db`, restoring any vaults and consumed
    /// proofs it holds. `config` is assumed validated.
    pub fn assemble(
        config: &EngineConfig,
        keys: EngineKeys,
        db: VaultDB,
        clock: SharedClock,
        handler: Arc<dyn SettlementHandler>,
    ) -> DbResult<Self> {
        let coprocessor = Arc::new(SealedCoprocessor::new(
            keys.coprocessor_key,
            keys.coprocessor_attestor,
        ));
        let attestor = Arc::new(InputAttestor::new(
            Arc::clone(&coprocessor),
            keys.input_attestor,
            Arc::clone(&clock),
            config.verifier.proof_ttl(),
        ));
        let settlement = SettlementAuthority::new(keys.settlement);

        let registry = Arc::new(ConsumedProofs::restore(db.clone())?);
        let verifier = Arc::new(Verifier::new(
            Arc::new(AttestedProofSystem::new(attestor.public_key())),
            registry,
            Arc::clone(&clock),
            config.verifier.clone(),
            (coprocessor.tag().clone(), coprocessor.version()),
        ));
        let arithmetic = ArithmeticUnit::new(
            Arc::clone(&coprocessor) as Arc<dyn HomomorphicScheme>,
            coprocessor.public_key(),
        );

        let feed = Arc::new(StaticPriceFeed::new());
        let oracle = Arc::new(PriceOracle::new(
            Arc::clone(&feed) as Arc<dyn PriceFeed>,
            Arc::clone(&clock),
            config.oracle.clone(),
        ));

        let ledger = Arc::new(VaultLedger::open(LedgerDeps {
            verifier,
            arithmetic,
            oracle: Arc::clone(&oracle),
            risk: config.risk.clone(),
            db,
            settlement_authority: settlement.public_key(),
            settlement: handler,
            clock: Arc::clone(&clock),
        })?);

        Ok(Self {
            ledger,
            coprocessor,
            attestor,
            feed,
            oracle,
            settlement,
            clock,
        })
    }

    /// Client side of an input: encrypt `amount` and prove `statement`
    /// about it for the transition `context`, at the current epoch.
    pub fn seal_input(
        &self,
        amount: u128,
        statement: &Statement,
        context: ProofContext,
    ) -> Result<(EncryptedValue, Vec<u8>), AttestError> {
        let ciphertext = self.coprocessor.encrypt_input(amount)?;
        let proof = self.attestor.prove(
            &ciphertext,
            statement,
            context,
            self.ledger.verifier().epoch(),
        )?;
        Ok((ciphertext, proof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_round_trip() {
        let keys = EngineKeys::generate();
        let file = keys.to_file();
        let restored = EngineKeys::from_file(&file).expect("valid key file");
        assert_eq!(restored.coprocessor_key, keys.coprocessor_key);
        assert_eq!(
            restored.settlement.public_key(),
            keys.settlement.public_key()
        );
    }

    #[test]
    fn short_coprocessor_key_rejected() {
        let mut file = EngineKeys::generate().to_file();
        file.coprocessor_key = "abcd".into();
        assert!(EngineKeys::from_file(&file).is_err());
    }
}
