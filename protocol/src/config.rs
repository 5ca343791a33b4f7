//! # Engine Configuration & Constants
//!
//! Every fixed-point scale, default ratio and timeout the engine relies on
//! lives here. If you're hardcoding a basis-point value somewhere else, move
//! it here first.
//!
//! Two layers:
//!
//! - **Constants** describe the number formats. They are part of the data
//!   model: changing `AMOUNT_SCALE` after vaults exist silently re-prices
//!   every balance, so treat them as frozen.
//! - **`EngineConfig`** holds the operator-tunable risk and runtime policy.
//!   It is serde-loadable (the node reads it from a JSON file), every field
//!   has a default, and [`EngineConfig::validate`] rejects combinations that
//!   would break the solvency invariants (e.g. a liquidation threshold above
//!   the minimum ratio).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cipher::fixed_point::collateral_value;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Engine Identity
// ---------------------------------------------------------------------------

/// Crate version, surfaced by the node's `/status` endpoint.
pub const ENGINE_VERSION: &str = "0.1.0";

/// Contract boundary name this engine serves.
pub const CONTRACT_NAME: &str = "ShieldedMintForge";

/// Ticker of the stablecoin minted against vault collateral.
pub const STABLECOIN_SYMBOL: &str = "FUSD";

/// Collateral asset used when a vault is created without naming one.
pub const DEFAULT_COLLATERAL_ASSET: &str = "ETH";

// ---------------------------------------------------------------------------
// Number Formats
// ---------------------------------------------------------------------------

/// Decimals of every amount (collateral and stablecoin alike).
pub const AMOUNT_DECIMALS: u32 = 18;

/// One whole unit of an amount. `1.0 ETH == AMOUNT_SCALE`.
pub const AMOUNT_SCALE: u128 = 10u128.pow(AMOUNT_DECIMALS);

/// Decimals of oracle prices.
pub const PRICE_DECIMALS: u32 = 8;

/// One whole stablecoin unit per whole collateral unit, as a price.
pub const PRICE_SCALE: u128 = 10u128.pow(PRICE_DECIMALS);

/// Basis-point denominator: `10_000 == 100%`.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Width of externally supplied plaintexts. The scheme itself works modulo
/// 2^128; capping inputs at 96 bits leaves headroom for sums and price
/// scaling before the tracked bound can reach the modulus.
pub const INPUT_BITS: u32 = 96;

/// Largest plaintext an external input may encode.
pub const MAX_INPUT_VALUE: u128 = (1u128 << INPUT_BITS) - 1;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. Twelve. Always twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Ed25519 signature length.
pub const SIGNATURE_LENGTH: usize = 64;

/// Digest length (BLAKE3).
pub const DIGEST_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Risk Defaults
// ---------------------------------------------------------------------------

/// Minimum collateralization ratio for minting: 150%.
pub const DEFAULT_MIN_RATIO_BPS: u32 = 15_000;

/// Ratio at or below which an Active vault is liquidated: 130%.
pub const DEFAULT_LIQUIDATION_THRESHOLD_BPS: u32 = 13_000;

/// Largest single collateral contribution a proof may attest.
pub const DEFAULT_MAX_DEPOSIT: u128 = MAX_INPUT_VALUE;

/// Largest single mint a proof may attest.
pub const DEFAULT_MAX_MINT: u128 = MAX_INPUT_VALUE;

// ---------------------------------------------------------------------------
// Timing Defaults
// ---------------------------------------------------------------------------

/// Oldest acceptable price quote.
pub const DEFAULT_MAX_STALENESS: Duration = Duration::from_secs(300);

/// How far in the future a quote's timestamp may be before it's rejected.
pub const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Per-call timeout on the price feed.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Per-call timeout on the proof system.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Lifetime of a freshly attested proof binding.
pub const DEFAULT_PROOF_TTL: Duration = Duration::from_secs(600);

/// How often the node drops consumed-proof entries whose bindings are dead.
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// Interval between scheduled liquidation sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How long a vault may keep failing evaluation before an operator is asked
/// to look at it.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(600);

/// Concurrent vault evaluations per sweep.
pub const DEFAULT_MAX_CONCURRENT_EVALUATIONS: usize = 16;

/// Largest sane oracle price (10 million stablecoin per unit).
pub const DEFAULT_MAX_PRICE: u128 = 10_000_000 * PRICE_SCALE;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Configuration errors caught by [`EngineConfig::validate`] or while loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field holds a value outside its legal range.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Solvency policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParams {
    /// Collateral value must stay at or above `debt * min_ratio_bps / 10_000`
    /// after a mint.
    pub min_ratio_bps: u32,
    /// Vaults at or below this ratio are liquidated.
    pub liquidation_threshold_bps: u32,
    /// Refuse to open vaults whose initial collateral is an encrypted zero.
    pub reject_zero_collateral: bool,
    /// Return the mint gate as a plaintext boolean instead of a sealed one.
    pub reveal_ratio_gate: bool,
    /// Allow anyone (not just the monitor or an operator) to liquidate.
    pub permissionless_liquidation: bool,
    /// Upper bound a collateral proof must attest.
    pub max_deposit: u128,
    /// Upper bound a mint proof must attest.
    pub max_mint: u128,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            min_ratio_bps: DEFAULT_MIN_RATIO_BPS,
            liquidation_threshold_bps: DEFAULT_LIQUIDATION_THRESHOLD_BPS,
            reject_zero_collateral: true,
            reveal_ratio_gate: false,
            permissionless_liquidation: false,
            max_deposit: DEFAULT_MAX_DEPOSIT,
            max_mint: DEFAULT_MAX_MINT,
        }
    }
}

/// Price oracle adapter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub max_staleness_secs: u64,
    pub max_clock_skew_secs: u64,
    pub timeout_ms: u64,
    /// Quotes above this (in `PRICE_SCALE` units) are rejected as garbage.
    pub max_price: u128,
    /// How often the node refreshes cached quotes.
    pub refresh_interval_ms: u64,
    pub retry: RetryPolicy,
}

impl OracleConfig {
    pub fn max_staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_staleness_secs as i64)
    }

    pub fn max_clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_clock_skew_secs as i64)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_staleness_secs: DEFAULT_MAX_STALENESS.as_secs(),
            max_clock_skew_secs: DEFAULT_MAX_CLOCK_SKEW.as_secs(),
            timeout_ms: DEFAULT_ORACLE_TIMEOUT.as_millis() as u64,
            max_price: DEFAULT_MAX_PRICE,
            refresh_interval_ms: 15_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Proof verifier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub timeout_ms: u64,
    /// Lifetime the input attestor stamps on new bindings.
    pub proof_ttl_secs: u64,
    /// Period of the consumed-proof pruning task.
    pub prune_interval_secs: u64,
    pub retry: RetryPolicy,
}

impl VerifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn proof_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.proof_ttl_secs as i64)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_VERIFY_TIMEOUT.as_millis() as u64,
            proof_ttl_secs: DEFAULT_PROOF_TTL.as_secs(),
            prune_interval_secs: DEFAULT_PRUNE_INTERVAL.as_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Liquidation monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    pub grace_period_secs: u64,
    pub max_concurrent_evaluations: usize,
    /// Sweep immediately whenever the oracle publishes a new price.
    pub sweep_on_price_update: bool,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_period_secs as i64)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
            grace_period_secs: DEFAULT_GRACE_PERIOD.as_secs(),
            max_concurrent_evaluations: DEFAULT_MAX_CONCURRENT_EVALUATIONS,
            sweep_on_price_update: true,
        }
    }
}

/// Everything the engine needs to know that isn't a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub risk: RiskParams,
    pub oracle: OracleConfig,
    pub verifier: VerifierConfig,
    pub monitor: MonitorConfig,
}

impl EngineConfig {
    /// Load and validate a config from a JSON file. Missing fields fall back
    /// to their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the solvency invariants
    /// unenforceable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let risk = &self.risk;
        if u128::from(risk.min_ratio_bps) < BPS_DENOMINATOR {
            return Err(invalid(
                "risk.min_ratio_bps",
                format!("{} is below 100%", risk.min_ratio_bps),
            ));
        }
        if risk.liquidation_threshold_bps > risk.min_ratio_bps {
            return Err(invalid(
                "risk.liquidation_threshold_bps",
                format!(
                    "{} exceeds min_ratio_bps {}",
                    risk.liquidation_threshold_bps, risk.min_ratio_bps
                ),
            ));
        }
        if u128::from(risk.liquidation_threshold_bps) < BPS_DENOMINATOR {
            return Err(invalid(
                "risk.liquidation_threshold_bps",
                format!("{} is below 100%", risk.liquidation_threshold_bps),
            ));
        }
        if risk.max_deposit == 0 || risk.max_deposit > MAX_INPUT_VALUE {
            return Err(invalid(
                "risk.max_deposit",
                format!("must be in 1..=2^{INPUT_BITS}-1"),
            ));
        }
        if risk.max_mint == 0 || risk.max_mint > MAX_INPUT_VALUE {
            return Err(invalid(
                "risk.max_mint",
                format!("must be in 1..=2^{INPUT_BITS}-1"),
            ));
        }

        if self.oracle.max_staleness_secs == 0 {
            return Err(invalid("oracle.max_staleness_secs", "must be non-zero".into()));
        }
        if self.oracle.timeout_ms == 0 {
            return Err(invalid("oracle.timeout_ms", "must be non-zero".into()));
        }
        if self.oracle.max_price == 0 {
            return Err(invalid("oracle.max_price", "must be non-zero".into()));
        }
        if collateral_value(risk.max_deposit, self.oracle.max_price).is_none() {
            return Err(invalid(
                "oracle.max_price",
                format!(
                    "a {} deposit could not be valued at {}",
                    risk.max_deposit, self.oracle.max_price
                ),
            ));
        }
        self.oracle
            .retry
            .validate()
            .map_err(|reason| invalid("oracle.retry", reason))?;

        if self.verifier.timeout_ms == 0 {
            return Err(invalid("verifier.timeout_ms", "must be non-zero".into()));
        }
        if self.verifier.proof_ttl_secs == 0 {
            return Err(invalid("verifier.proof_ttl_secs", "must be non-zero".into()));
        }
        if self.verifier.prune_interval_secs == 0 {
            return Err(invalid("verifier.prune_interval_secs", "must be non-zero".into()));
        }
        self.verifier
            .retry
            .validate()
            .map_err(|reason| invalid("verifier.retry", reason))?;

        if self.monitor.interval_ms == 0 {
            return Err(invalid("monitor.interval_ms", "must be non-zero".into()));
        }
        if self.monitor.max_concurrent_evaluations == 0 {
            return Err(invalid(
                "monitor.max_concurrent_evaluations",
                "must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_are_consistent() {
        assert_eq!(AMOUNT_SCALE, 1_000_000_000_000_000_000);
        assert_eq!(PRICE_SCALE, 100_000_000);
        assert_eq!(MAX_INPUT_VALUE, u128::from(u64::MAX) * (1u128 << 32) + u128::from(u32::MAX));
    }

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn threshold_above_min_ratio_is_rejected() {
        let mut config = EngineConfig::default();
        config.risk.liquidation_threshold_bps = 16_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "risk.liquidation_threshold_bps", .. })
        ));
    }

    #[test]
    fn sub_par_ratio_is_rejected() {
        let mut config = EngineConfig::default();
        config.risk.min_ratio_bps = 9_000;
        config.risk.liquidation_threshold_bps = 9_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_deposit_cap_is_rejected() {
        let mut config = EngineConfig::default();
        config.risk.max_deposit = MAX_INPUT_VALUE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn price_cap_must_leave_room_to_value_a_deposit() {
        let mut config = EngineConfig::default();
        config.oracle.max_price = u128::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "oracle.max_price", .. })
        ));
    }

    #[test]
    fn zero_prune_interval_is_rejected() {
        let mut config = EngineConfig::default();
        config.verifier.prune_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "risk": { "reveal_ratio_gate": true } }"#).unwrap();
        assert!(config.risk.reveal_ratio_gate);
        assert_eq!(config.risk.min_ratio_bps, DEFAULT_MIN_RATIO_BPS);
        assert_eq!(config.monitor, MonitorConfig::default());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "monitor": { "interval_ms": 500 } }"#).unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.monitor.interval(), Duration::from_millis(500));
    }
}
