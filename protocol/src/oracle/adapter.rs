//! # Price Oracle Adapter
//!
//! Sits between a [`PriceFeed`] and everything that values collateral.
//! Responsibilities:
//!
//! - **Validation.** A quote is rejected if its price is zero or above
//!   `max_price` (`InvalidQuote`), if it claims to be from further in the
//!   future than `max_clock_skew` (`InvalidQuote`), or if it's older than
//!   `max_staleness` (`StaleOracleData`). A bad price is a hard stop; there
//!   is no fallback price.
//! - **Bounded calls.** Each feed call has a timeout; transient failures back
//!   off exponentially up to the retry budget.
//! - **Caching.** The latest good snapshot per asset lives behind a
//!   `parking_lot::RwLock`. Readers clone a complete snapshot out, so no
//!   reader ever sees a half-written quote.
//! - **Notification.** Every newly cached snapshot is broadcast as a
//!   [`PriceUpdate`]; the liquidation monitor sweeps on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::OracleConfig;
use crate::error::{OracleError, Result, TransientError, VaultError};
use crate::oracle::feed::{FeedError, PriceFeed};
use crate::oracle::quote::{PriceQuote, PriceSnapshot, PriceUpdate};
use crate::retry::{retry_with_timeout, RetryError};
use crate::types::AssetId;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct PriceOracle {
    feed: Arc<dyn PriceFeed>,
    clock: SharedClock,
    config: OracleConfig,
    cache: RwLock<HashMap<AssetId, PriceSnapshot>>,
    seq: AtomicU64,
    updates: broadcast::Sender<PriceUpdate>,
}

impl PriceOracle {
    pub fn new(feed: Arc<dyn PriceFeed>, clock: SharedClock, config: OracleConfig) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            feed,
            clock,
            config,
            cache: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            updates,
        }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Receive a [`PriceUpdate`] for every snapshot cached from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdate> {
        self.updates.subscribe()
    }

    /// The last cached snapshot, fresh or not.
    pub fn cached(&self, asset: &AssetId) -> Option<PriceSnapshot> {
        self.cache.read().get(asset).cloned()
    }

    /// A snapshot that is valid right now.
    ///
    /// Served from cache while the cached quote is within the staleness
    /// window, otherwise fetched from the feed.
    pub async fn current_price(&self, asset: &AssetId) -> Result<PriceSnapshot> {
        if let Some(snapshot) = self.cached(asset) {
            if self.check_quote(&snapshot.quote).is_ok() {
                return Ok(snapshot);
            }
            debug!(%asset, seq = snapshot.seq, "cached quote aged out, refetching");
        }
        self.refresh(asset).await
    }

    /// Fetch, validate, cache and broadcast a new snapshot for `asset`.
    pub async fn refresh(&self, asset: &AssetId) -> Result<PriceSnapshot> {
        let quote = retry_with_timeout(
            &self.config.retry,
            self.config.timeout(),
            "price_feed",
            |_| self.feed.fetch(asset),
        )
        .await
        .map_err(|e| feed_error(asset, e))?;

        if let Err(e) = self.check_quote(&quote) {
            warn!(%asset, source = %quote.source, error = %e, "rejected price quote");
            return Err(e.into());
        }

        let snapshot = PriceSnapshot {
            quote,
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.cache.write().insert(asset.clone(), snapshot.clone());
        // No subscribers is fine.
        let _ = self.updates.send(PriceUpdate::from(&snapshot));
        info!(
            %asset,
            price = snapshot.quote.price,
            seq = snapshot.seq,
            source = %snapshot.quote.source,
            "price snapshot cached"
        );
        Ok(snapshot)
    }

    fn check_quote(&self, quote: &PriceQuote) -> std::result::Result<(), OracleError> {
        if quote.price == 0 {
            return Err(OracleError::InvalidQuote {
                asset: quote.asset.clone(),
                reason: "zero price".into(),
            });
        }
        if quote.price > self.config.max_price {
            return Err(OracleError::InvalidQuote {
                asset: quote.asset.clone(),
                reason: format!("price {} above cap {}", quote.price, self.config.max_price),
            });
        }

        let now = self.clock.now();
        if quote.as_of > now + self.config.max_clock_skew() {
            return Err(OracleError::InvalidQuote {
                asset: quote.asset.clone(),
                reason: format!("quote dated {} is in the future", quote.as_of.to_rfc3339()),
            });
        }
        let age = now - quote.as_of;
        if age > self.config.max_staleness() {
            return Err(OracleError::StaleOracleData {
                asset: quote.asset.clone(),
                age_secs: age.num_seconds(),
                max_secs: self.config.max_staleness().num_seconds(),
            });
        }
        Ok(())
    }
}

fn feed_error(asset: &AssetId, err: RetryError<FeedError>) -> VaultError {
    match err {
        RetryError::TimedOut { timeout, .. } => TransientError::Timeout {
            operation: "price_feed",
            after_ms: timeout.as_millis() as u64,
        }
        .into(),
        RetryError::Exhausted { last, .. } => TransientError::Backend {
            operation: "price_feed",
            reason: last.to_string(),
        }
        .into(),
        RetryError::Fatal(e) => OracleError::Unavailable {
            asset: asset.clone(),
            reason: e.to_string(),
        }
        .into(),
    }
}
