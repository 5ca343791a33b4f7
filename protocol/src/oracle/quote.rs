//! Quotes and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cipher::Price;
use crate::error::OracleError;
use crate::types::AssetId;

/// One observation from a price feed. `price` is `PRICE_SCALE` fixed point,
/// stablecoin per whole unit of `asset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub asset: AssetId,
    pub price: u128,
    pub as_of: DateTime<Utc>,
    pub source: String,
}

impl PriceQuote {
    pub fn new(asset: AssetId, price: u128, as_of: DateTime<Utc>, source: impl Into<String>) -> Self {
        Self {
            asset,
            price,
            as_of,
            source: source.into(),
        }
    }
}

/// A validated quote as handed to a transition. Every comparison inside one
/// transition uses the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub quote: PriceQuote,
    /// Monotonic across all assets; later snapshots have larger numbers.
    pub seq: u64,
}

impl PriceSnapshot {
    /// The price to value `asset` with. Refuses to price a different asset
    /// than the snapshot was taken for.
    pub fn price_for(&self, asset: &AssetId) -> Result<Price, OracleError> {
        if &self.quote.asset != asset {
            return Err(OracleError::InconsistentSnapshot {
                reason: format!(
                    "snapshot #{} prices {}, transition needs {}",
                    self.seq, self.quote.asset, asset
                ),
            });
        }
        Ok(Price::Plain(self.quote.price))
    }
}

/// Broadcast to subscribers whenever the oracle caches a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub asset: AssetId,
    pub seq: u64,
    pub price: u128,
    pub as_of: DateTime<Utc>,
}

impl From<&PriceSnapshot> for PriceUpdate {
    fn from(snapshot: &PriceSnapshot) -> Self {
        Self {
            asset: snapshot.quote.asset.clone(),
            seq: snapshot.seq,
            price: snapshot.quote.price,
            as_of: snapshot.quote.as_of,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_refuses_other_asset() {
        let snapshot = PriceSnapshot {
            quote: PriceQuote::new(AssetId::new("ETH"), 3_000, Utc::now(), "test"),
            seq: 1,
        };
        assert_eq!(snapshot.price_for(&AssetId::new("ETH")).unwrap(), Price::Plain(3_000));
        assert!(matches!(
            snapshot.price_for(&AssetId::new("BTC")),
            Err(OracleError::InconsistentSnapshot { .. })
        ));
    }
}
