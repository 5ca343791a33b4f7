//! # Price Oracle
//!
//! Collateral is only ever valued against a validated, fresh
//! [`PriceSnapshot`] from the [`PriceOracle`]. Where the quotes come from is
//! a [`PriceFeed`] capability; the devnet node and the tests use the
//! operator-set [`StaticPriceFeed`].

pub mod adapter;
pub mod feed;
pub mod quote;

pub use adapter::PriceOracle;
pub use feed::{FeedError, PriceFeed, StaticPriceFeed};
pub use quote::{PriceQuote, PriceSnapshot, PriceUpdate};
