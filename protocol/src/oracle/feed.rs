//! Price feed capability and the static devnet feed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::oracle::quote::PriceQuote;
use crate::retry::Retryable;
use crate::types::AssetId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The feed has no price for this asset. Not retried.
    #[error("no price for {0}")]
    Unavailable(AssetId),

    /// The feed hiccupped. Retried with backoff.
    #[error("transient feed failure: {0}")]
    Transient(String),
}

impl Retryable for FeedError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A source of price quotes. May be remote.
#[async_trait]
pub trait PriceFeed: Send + Sync + fmt::Debug {
    async fn fetch(&self, asset: &AssetId) -> Result<PriceQuote, FeedError>;
}

/// Operator-set quotes. Used by devnet nodes and tests.
///
/// `fail_next(n)` makes the next `n` fetches fail transiently, which is
/// handy for exercising backoff paths.
#[derive(Debug, Default)]
pub struct StaticPriceFeed {
    quotes: RwLock<HashMap<AssetId, PriceQuote>>,
    failures: AtomicU32,
}

impl StaticPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(&self, quote: PriceQuote) {
        self.quotes.write().insert(quote.asset.clone(), quote);
    }

    pub fn set_price(&self, asset: AssetId, price: u128, as_of: DateTime<Utc>) {
        self.set_quote(PriceQuote::new(asset, price, as_of, "static"));
    }

    pub fn remove(&self, asset: &AssetId) {
        self.quotes.write().remove(asset);
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn fetch(&self, asset: &AssetId) -> Result<PriceQuote, FeedError> {
        let pending = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(FeedError::Transient("injected failure".into()));
        }
        self.quotes
            .read()
            .get(asset)
            .cloned()
            .ok_or_else(|| FeedError::Unavailable(asset.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_what_was_set() {
        let feed = StaticPriceFeed::new();
        let eth = AssetId::new("ETH");
        assert_eq!(feed.fetch(&eth).await, Err(FeedError::Unavailable(eth.clone())));
        feed.set_price(eth.clone(), 42, Utc::now());
        assert_eq!(feed.fetch(&eth).await.unwrap().price, 42);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let feed = StaticPriceFeed::new();
        let eth = AssetId::new("ETH");
        feed.set_price(eth.clone(), 42, Utc::now());
        feed.fail_next(2);
        assert!(feed.fetch(&eth).await.unwrap_err().is_transient());
        assert!(feed.fetch(&eth).await.is_err());
        assert!(feed.fetch(&eth).await.is_ok());
    }
}
