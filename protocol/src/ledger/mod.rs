//! # Vault Ledger
//!
//! The authoritative set of vaults and the only code that changes them.
//!
//! ## Transition shape
//!
//! Every mutating operation follows the same sequence, inside the vault's
//! exclusive section:
//!
//! ```text
//! lock vault ─► check state ─► verify proof ─► (read price ─► compare)
//!            ─► build next record ─► redeem proof ─► write sled txn
//!            ─► commit redemption ─► swap in-memory record ─► emit event
//! ```
//!
//! Nothing is observable until the sled transaction succeeds. If anything
//! before it fails, the in-memory record is untouched and the proof digest
//! is released. The steps after the write are infallible and synchronous.
//!
//! ## Valuation headroom
//!
//! Collateral bounds only grow, and every deposit proof attests the full
//! `max_deposit`. A deposit is refused with `RangeOverflow` when the new
//! bound could no longer be valued at `oracle.max_price`, so no sequence of
//! deposits can leave a vault that the health check can't price.
//!
//! ## Locking
//!
//! Vaults live in `DashMap<VaultId, Arc<Mutex<Vault>>>`. The `Arc` is cloned
//! out of the map before awaiting the `tokio::sync::Mutex`, so no shard
//! guard is ever held across an `.await`. Two transitions on one vault
//! serialize; transitions on different vaults don't contend.

pub mod events;
pub mod settlement;
pub mod state;
pub mod vault;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cipher::{ArithmeticUnit, EncryptedBool, EncryptedValue};
use crate::clock::SharedClock;
use crate::config::RiskParams;
use crate::crypto::keys::AttestorPublicKey;
use crate::error::{InvariantViolation, Result, StateError};
use crate::oracle::PriceOracle;
use crate::proof::{CapabilityToken, ProofContext, Statement, Verifier};
use crate::storage::{DbResult, VaultDB};
use crate::types::{AssetId, Initiator, OperationKind, OwnerId, VaultId, VaultStatus};

pub use events::LedgerEvent;
pub use settlement::{
    ChannelSettlement, LiquidationNotice, NoopSettlement, SettlementAttestation,
    SettlementAuthority, SettlementHandler,
};
pub use state::{Transition, VaultState};
pub use vault::{Vault, VaultReport};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What the caller learns about the collateral-ratio gate of a mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// The gate's result as a sealed boolean. The default.
    Sealed(EncryptedBool),
    /// The gate's result in the clear (`reveal_ratio_gate = true`).
    Revealed(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintResult {
    pub vault_id: VaultId,
    pub gate: GateOutcome,
    /// Sequence number of the price snapshot the gate was evaluated at.
    pub price_seq: u64,
}

/// Number of vaults in each lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub active: usize,
    pub liquidating: usize,
    pub closed: usize,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Everything the ledger is wired to.
#[derive(Debug)]
pub struct LedgerDeps {
    pub verifier: Arc<Verifier>,
    pub arithmetic: ArithmeticUnit,
    pub oracle: Arc<PriceOracle>,
    pub risk: RiskParams,
    pub db: VaultDB,
    /// Key whose signature [`VaultLedger::close_vault`] requires.
    pub settlement_authority: AttestorPublicKey,
    pub settlement: Arc<dyn SettlementHandler>,
    pub clock: SharedClock,
}

#[derive(Debug)]
pub struct VaultLedger {
    vaults: DashMap<VaultId, Arc<Mutex<Vault>>>,
    statuses: DashMap<VaultId, VaultStatus>,
    next_id: AtomicU64,
    verifier: Arc<Verifier>,
    arithmetic: ArithmeticUnit,
    oracle: Arc<PriceOracle>,
    risk: RiskParams,
    db: VaultDB,
    settlement_authority: AttestorPublicKey,
    settlement: Arc<dyn SettlementHandler>,
    events: broadcast::Sender<LedgerEvent>,
    clock: SharedClock,
}

impl VaultLedger {
    /// Build a ledger, loading every vault `deps.db` holds.
    pub fn open(deps: LedgerDeps) -> DbResult<Self> {
        let vaults = DashMap::new();
        let statuses = DashMap::new();
        let mut next = deps.db.next_vault_id()?.unwrap_or(1).max(1);
        for vault in deps.db.load_vaults()? {
            next = next.max(vault.id.0 + 1);
            statuses.insert(vault.id, vault.status());
            vaults.insert(vault.id, Arc::new(Mutex::new(vault)));
        }
        if !vaults.is_empty() {
            info!(vaults = vaults.len(), next_id = next, "restored vault ledger");
        }
        let (events, _) = broadcast::channel(events::EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            vaults,
            statuses,
            next_id: AtomicU64::new(next),
            verifier: deps.verifier,
            arithmetic: deps.arithmetic,
            oracle: deps.oracle,
            risk: deps.risk,
            db: deps.db,
            settlement_authority: deps.settlement_authority,
            settlement: deps.settlement,
            events,
            clock: deps.clock,
        })
    }

    // -- Accessors ----------------------------------------------------------

    pub fn risk(&self) -> &RiskParams {
        &self.risk
    }

    pub fn oracle(&self) -> &Arc<PriceOracle> {
        &self.oracle
    }

    pub fn verifier(&self) -> &Arc<Verifier> {
        &self.verifier
    }

    pub fn arithmetic(&self) -> &ArithmeticUnit {
        &self.arithmetic
    }

    pub fn db(&self) -> &VaultDB {
        &self.db
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.vaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }

    /// Ids of all vaults, optionally only those in `status`, ascending.
    pub fn vault_ids(&self, status: Option<VaultStatus>) -> Vec<VaultId> {
        let mut ids: Vec<VaultId> = self
            .statuses
            .iter()
            .filter(|entry| status.map_or(true, |s| *entry.value() == s))
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.statuses.iter() {
            match entry.value() {
                VaultStatus::Active => counts.active += 1,
                VaultStatus::Liquidating => counts.liquidating += 1,
                VaultStatus::Closed => counts.closed += 1,
            }
        }
        counts
    }

    // -- Queries ------------------------------------------------------------

    /// Public status of a vault. Never includes balances.
    pub async fn vault_status(&self, vault_id: VaultId) -> Result<VaultReport> {
        let cell = self.cell(vault_id)?;
        let vault = cell.lock().await;
        Ok(vault.report())
    }

    /// A consistent copy of the full vault record, ciphertexts included.
    pub async fn snapshot(&self, vault_id: VaultId) -> Result<Vault> {
        let cell = self.cell(vault_id)?;
        let vault = cell.lock().await;
        Ok(vault.clone())
    }

    /// Whether `vault_id` is above the liquidation threshold at the current
    /// price. Evaluated on a copy; takes the vault lock only to copy it.
    pub async fn check_health(&self, vault_id: VaultId) -> Result<bool> {
        let vault = self.snapshot(vault_id).await?;
        self.is_healthy(&vault).await.map(|(healthy, _)| healthy)
    }

    // -- Transitions --------------------------------------------------------

    /// Open a vault for `owner` with an initial encrypted deposit.
    #[instrument(skip_all, fields(request = %Uuid::new_v4(), %owner))]
    pub async fn create_vault(
        &self,
        owner: OwnerId,
        asset: Option<AssetId>,
        collateral: EncryptedValue,
        proof: &[u8],
    ) -> Result<VaultId> {
        let asset = asset.unwrap_or_default();
        let scope = ProofContext::new(owner.clone(), OperationKind::CreateVault, None);
        let token = self
            .verifier
            .verify(
                &collateral,
                proof,
                &Statement::RangeBound(self.risk.max_deposit),
                &scope,
            )
            .await?;
        let collateral = collateral.with_bound(token.attested_bound());
        self.ensure_valuable(&collateral, "create_vault")?;

        if self.risk.reject_zero_collateral {
            let zero = self.arithmetic.is_zero(&collateral)?;
            if self.arithmetic.evaluate(&zero)? {
                warn!("rejected zero-collateral vault");
                return Err(InvariantViolation::ZeroCollateralRejected.into());
            }
        }

        let now = self.clock.now();
        let vault_id = VaultId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let vault = Vault {
            id: vault_id,
            owner: owner.clone(),
            asset,
            collateral,
            debt: self.arithmetic.encrypt_zero()?,
            state: VaultState::Active,
            created_at: now,
            last_updated_at: now,
        };

        self.commit(&vault, token, &scope, Some(vault_id.0 + 1))?;
        self.statuses.insert(vault_id, VaultStatus::Active);
        self.vaults.insert(vault_id, Arc::new(Mutex::new(vault)));

        info!(%vault_id, "vault created");
        self.emit(LedgerEvent::VaultCreated { vault_id, owner, at: now });
        Ok(vault_id)
    }

    /// Homomorphically add `delta` to the vault's collateral.
    #[instrument(skip_all, fields(request = %Uuid::new_v4(), %vault_id))]
    pub async fn add_collateral(
        &self,
        vault_id: VaultId,
        delta: EncryptedValue,
        proof: &[u8],
    ) -> Result<()> {
        let cell = self.cell(vault_id)?;
        let mut vault = cell.lock().await;
        vault.require_active()?;

        let scope = ProofContext::new(
            vault.owner.clone(),
            OperationKind::AddCollateral,
            Some(vault_id),
        );
        let token = self
            .verifier
            .verify(&delta, proof, &Statement::RangeBound(self.risk.max_deposit), &scope)
            .await?;
        let delta = delta.with_bound(token.attested_bound());

        let now = self.clock.now();
        let mut next = vault.clone();
        next.state = vault.state.apply(Transition::Deposit)?;
        next.collateral = self.arithmetic.add(&vault.collateral, &delta)?;
        next.last_updated_at = now;
        self.ensure_valuable(&next.collateral, "add_collateral")?;

        self.commit(&next, token, &scope, None)?;
        *vault = next;

        info!("collateral added");
        self.emit(LedgerEvent::CollateralAdded { vault_id, at: now });
        Ok(())
    }

    /// Mint `amount` of stablecoin against the vault if the resulting debt
    /// stays within the minimum collateral ratio.
    ///
    /// On `InsufficientCollateral` the vault is untouched and the proof is
    /// not consumed.
    #[instrument(skip_all, fields(request = %Uuid::new_v4(), %vault_id))]
    pub async fn request_minting(
        &self,
        vault_id: VaultId,
        amount: EncryptedValue,
        proof: &[u8],
    ) -> Result<MintResult> {
        let cell = self.cell(vault_id)?;
        let mut vault = cell.lock().await;
        vault.require_active()?;

        let scope = ProofContext::new(vault.owner.clone(), OperationKind::Mint, Some(vault_id));
        let token = self
            .verifier
            .verify(&amount, proof, &Statement::RangeBound(self.risk.max_mint), &scope)
            .await?;
        let amount = amount.with_bound(token.attested_bound());
        let prospective_debt = self.arithmetic.add(&vault.debt, &amount)?;

        // One snapshot for the whole evaluation.
        let snapshot = self.oracle.current_price(&vault.asset).await?;
        let price = snapshot.price_for(&vault.asset)?;
        let value = self.arithmetic.scale_by_price(&vault.collateral, &price)?;
        let gate = self
            .arithmetic
            .compare_ge(&value, &prospective_debt, self.risk.min_ratio_bps)?;
        let passes = self.arithmetic.evaluate(&gate)?;
        debug!(price_seq = snapshot.seq, passes, "mint gate evaluated");

        let now = self.clock.now();
        if !passes {
            warn!(price_seq = snapshot.seq, "mint rejected: insufficient collateral");
            self.emit(LedgerEvent::MintRejected {
                vault_id,
                price_seq: snapshot.seq,
                at: now,
            });
            return Err(InvariantViolation::InsufficientCollateral(vault_id).into());
        }

        let mut next = vault.clone();
        next.state = vault.state.apply(Transition::Mint)?;
        next.debt = prospective_debt;
        next.last_updated_at = now;

        self.commit(&next, token, &scope, None)?;
        *vault = next;

        info!(price_seq = snapshot.seq, "minted");
        self.emit(LedgerEvent::Minted {
            vault_id,
            price_seq: snapshot.seq,
            at: now,
        });
        let gate = if self.risk.reveal_ratio_gate {
            GateOutcome::Revealed(passes)
        } else {
            GateOutcome::Sealed(gate)
        };
        Ok(MintResult {
            vault_id,
            gate,
            price_seq: snapshot.seq,
        })
    }

    /// Move an undercollateralized vault to `Liquidating`.
    ///
    /// Health is re-evaluated at a fresh price under the vault's lock, so a
    /// vault cured since the caller looked fails `VaultHealthy`.
    #[instrument(skip_all, fields(request = %Uuid::new_v4(), %vault_id, %initiator))]
    pub async fn liquidate(&self, vault_id: VaultId, initiator: Initiator) -> Result<()> {
        if matches!(initiator, Initiator::External(_)) && !self.risk.permissionless_liquidation
        {
            warn!("unauthorized liquidation attempt");
            return Err(StateError::Unauthorized { initiator }.into());
        }

        let cell = self.cell(vault_id)?;
        let mut vault = cell.lock().await;
        vault.require_active()?;

        let (healthy, price_seq) = self.is_healthy(&vault).await?;
        if healthy {
            debug!(price_seq, "vault healthy; liquidation refused");
            return Err(StateError::VaultHealthy(vault_id).into());
        }

        let now = self.clock.now();
        let mut next = vault.clone();
        next.state = vault.state.apply(Transition::Liquidate { at: now })?;
        next.last_updated_at = now;

        self.db.commit_transition(&next, None, None)?;
        *vault = next;
        self.statuses.insert(vault_id, VaultStatus::Liquidating);

        info!(price_seq, "vault liquidated");
        self.settlement.on_liquidation(LiquidationNotice {
            vault_id,
            owner: vault.owner.clone(),
            initiator: initiator.clone(),
            at: now,
        });
        self.emit(LedgerEvent::Liquidated {
            vault_id,
            initiator,
            at: now,
        });
        Ok(())
    }

    /// Close a liquidated vault once its settlement is attested. Terminal.
    #[instrument(skip_all, fields(request = %Uuid::new_v4(), %vault_id))]
    pub async fn close_vault(
        &self,
        vault_id: VaultId,
        settlement: &SettlementAttestation,
    ) -> Result<()> {
        let cell = self.cell(vault_id)?;
        let mut vault = cell.lock().await;

        let now = self.clock.now();
        let state = vault.state.apply(Transition::Close { at: now })?;
        if !settlement.verify(vault_id, &self.settlement_authority) {
            warn!("settlement attestation rejected");
            return Err(StateError::SettlementUnattested(vault_id).into());
        }

        let mut next = vault.clone();
        next.state = state;
        next.last_updated_at = now;

        self.db.commit_transition(&next, None, None)?;
        *vault = next;
        self.statuses.insert(vault_id, VaultStatus::Closed);

        info!(settled_at = %settlement.settled_at, "vault closed");
        self.emit(LedgerEvent::Closed { vault_id, at: now });
        Ok(())
    }

    // -- Internals ----------------------------------------------------------

    fn cell(&self, vault_id: VaultId) -> Result<Arc<Mutex<Vault>>> {
        self.vaults
            .get(&vault_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StateError::VaultNotFound(vault_id).into())
    }

    /// `(above threshold, price seq)` for `vault` at a fresh snapshot.
    async fn is_healthy(&self, vault: &Vault) -> Result<(bool, u64)> {
        let snapshot = self.oracle.current_price(&vault.asset).await?;
        let price = snapshot.price_for(&vault.asset)?;
        let value = self.arithmetic.scale_by_price(&vault.collateral, &price)?;
        let above = self.arithmetic.compare_gt(
            &value,
            &vault.debt,
            self.risk.liquidation_threshold_bps,
        )?;
        let healthy = self.arithmetic.evaluate(&above)?;
        debug!(vault_id = %vault.id, price_seq = snapshot.seq, healthy, "health evaluated");
        Ok((healthy, snapshot.seq))
    }

    /// Refuse collateral whose tracked bound could not be valued at the
    /// oracle's price cap.
    fn ensure_valuable(&self, collateral: &EncryptedValue, operation: &'static str) -> Result<()> {
        let max_price = self.oracle.config().max_price;
        self.arithmetic
            .ensure_valuable(collateral, max_price, operation)
            .map_err(|e| {
                warn!(bound = collateral.bound(), max_price, "deposit refused: collateral bound exhausted");
                e
            })
    }

    /// Redeem `token` and persist `vault` with the consumed digest (and the
    /// next vault id, on creation) in one transaction. On error nothing is
    /// consumed.
    fn commit(
        &self,
        vault: &Vault,
        token: CapabilityToken,
        scope: &ProofContext,
        next_vault_id: Option<u64>,
    ) -> Result<()> {
        let redemption = self.verifier.redeem(token, scope)?;
        self.db.commit_transition(
            vault,
            Some((redemption.digest(), redemption.entry())),
            next_vault_id,
        )?;
        redemption.commit();
        Ok(())
    }

    fn emit(&self, event: LedgerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
