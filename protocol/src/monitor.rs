//! # Liquidation Monitor
//!
//! Background loop that keeps every Active vault above the liquidation
//! threshold, or moves it out of Active.
//!
//! ## How it works
//!
//! A sweep runs every `interval` and, if configured, on every price update.
//! Each sweep:
//!
//! 1. Lists the Active vaults.
//! 2. Evaluates each one independently, at most `max_concurrent_evaluations`
//!    at a time: copy the vault, take a price snapshot, sealed
//!    `collateral·price > threshold·debt`, attested.
//! 3. Calls `ledger.liquidate(id, Monitor)` for each vault that fails. The
//!    ledger re-checks under the vault's lock, so a vault cured in between
//!    comes back `VaultHealthy` and is counted healthy.
//!
//! An error on one vault is recorded against that vault only. A vault that
//! keeps failing evaluation for longer than `grace_period` is flagged for
//! operator review. Any later successful evaluation clears the flag.
//!
//! ## Shutdown
//!
//! [`LiquidationMonitor::run`] watches a `tokio::sync::watch` channel and
//! returns after the sweep in progress finishes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::MonitorConfig;
use crate::error::{StateError, VaultError};
use crate::ledger::VaultLedger;
use crate::types::{Initiator, VaultId, VaultStatus};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A vault that needs a human to look at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFlag {
    pub vault_id: VaultId,
    pub failing_since: DateTime<Utc>,
    pub flagged_at: DateTime<Utc>,
    pub last_error: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub evaluated: usize,
    pub healthy: usize,
    pub liquidated: Vec<VaultId>,
    pub failed: Vec<(VaultId, String)>,
    /// Vaults newly flagged for review in this sweep.
    pub flagged: Vec<VaultId>,
}

enum Outcome {
    Healthy,
    Liquidated,
    /// Left Active between listing and evaluation.
    Skipped,
    Failed(VaultError),
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct LiquidationMonitor {
    ledger: Arc<VaultLedger>,
    config: MonitorConfig,
    clock: SharedClock,
    failing_since: DashMap<VaultId, DateTime<Utc>>,
    review: DashMap<VaultId, ReviewFlag>,
}

impl LiquidationMonitor {
    pub fn new(ledger: Arc<VaultLedger>, config: MonitorConfig, clock: SharedClock) -> Self {
        Self {
            ledger,
            config,
            clock,
            failing_since: DashMap::new(),
            review: DashMap::new(),
        }
    }

    /// Vaults currently flagged for operator review, by id.
    pub fn review_queue(&self) -> Vec<ReviewFlag> {
        let mut flags: Vec<ReviewFlag> = self.review.iter().map(|e| e.value().clone()).collect();
        flags.sort_by_key(|f| f.vault_id);
        flags
    }

    /// Run sweeps until `shutdown` flips to `true` or its sender drops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval_ms,
            on_price_update = self.config.sweep_on_price_update,
            "liquidation monitor starting"
        );
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut prices = self.ledger.oracle().subscribe();
        let mut listen_prices = self.config.sweep_on_price_update;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                update = prices.recv(), if listen_prices => match update {
                    Ok(update) => debug!(asset = %update.asset, seq = update.seq, "price update"),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "price updates lagged"),
                    Err(RecvError::Closed) => {
                        warn!("price update channel closed; sweeping on interval only");
                        listen_prices = false;
                        continue;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let report = self.sweep().await;
            if !report.liquidated.is_empty() || !report.failed.is_empty() {
                info!(
                    evaluated = report.evaluated,
                    liquidated = report.liquidated.len(),
                    failed = report.failed.len(),
                    "sweep completed"
                );
            }
        }
        info!("liquidation monitor stopped");
    }

    /// Evaluate every Active vault once.
    pub async fn sweep(&self) -> SweepReport {
        let ids = self.ledger.vault_ids(Some(VaultStatus::Active));
        let limit = self.config.max_concurrent_evaluations.max(1);

        let outcomes: Vec<(VaultId, Outcome)> = stream::iter(ids)
            .map(|id| async move { (id, self.evaluate(id).await) })
            .buffer_unordered(limit)
            .collect()
            .await;

        let now = self.clock.now();
        let mut report = SweepReport::default();
        for (vault_id, outcome) in outcomes {
            match outcome {
                Outcome::Skipped => {
                    self.clear(vault_id);
                    continue;
                }
                Outcome::Healthy => {
                    report.healthy += 1;
                    self.clear(vault_id);
                }
                Outcome::Liquidated => {
                    report.liquidated.push(vault_id);
                    self.clear(vault_id);
                }
                Outcome::Failed(err) => {
                    let reason = err.to_string();
                    if self.record_failure(vault_id, &reason, now) {
                        report.flagged.push(vault_id);
                    }
                    report.failed.push((vault_id, reason));
                }
            }
            report.evaluated += 1;
        }
        report.liquidated.sort_unstable();
        report.failed.sort_by_key(|(id, _)| *id);
        report.flagged.sort_unstable();
        report
    }

    async fn evaluate(&self, vault_id: VaultId) -> Outcome {
        match self.ledger.check_health(vault_id).await {
            Ok(true) => return Outcome::Healthy,
            Ok(false) => {}
            Err(err) => return Self::classify(vault_id, err),
        }
        match self.ledger.liquidate(vault_id, Initiator::Monitor).await {
            Ok(()) => Outcome::Liquidated,
            Err(err) => Self::classify(vault_id, err),
        }
    }

    fn classify(vault_id: VaultId, err: VaultError) -> Outcome {
        match err {
            VaultError::State(StateError::VaultHealthy(_)) => {
                debug!(%vault_id, "vault cured before liquidation");
                Outcome::Healthy
            }
            VaultError::State(StateError::VaultNotActive { .. } | StateError::VaultNotFound(_)) => {
                Outcome::Skipped
            }
            err => {
                warn!(%vault_id, error = %err, category = err.category(), "vault evaluation failed");
                Outcome::Failed(err)
            }
        }
    }

    /// Track a failure. Returns `true` if it newly flags the vault.
    fn record_failure(&self, vault_id: VaultId, reason: &str, now: DateTime<Utc>) -> bool {
        let since = *self.failing_since.entry(vault_id).or_insert(now);
        if let Some(mut flag) = self.review.get_mut(&vault_id) {
            flag.last_error = reason.to_string();
            return false;
        }
        if now - since <= self.config.grace_period() {
            return false;
        }
        warn!(%vault_id, failing_since = %since, error = reason, "vault flagged for operator review");
        self.review.insert(
            vault_id,
            ReviewFlag {
                vault_id,
                failing_since: since,
                flagged_at: now,
                last_error: reason.to_string(),
            },
        );
        true
    }

    fn clear(&self, vault_id: VaultId) {
        self.failing_since.remove(&vault_id);
        if self.review.remove(&vault_id).is_some() {
            info!(%vault_id, "review flag cleared");
        }
    }
}
