//! # CLI Interface
//!
//! Command-line arguments for `shieldmint-node`, via `clap` derive. Three
//! subcommands: `run`, `init`, and `version`. Every `run` flag can also be
//! set through a `SHIELDMINT_*` environment variable.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use shieldmint_protocol::config::EngineConfig;

/// ShieldMint engine node.
///
/// Runs the confidential vault ledger with its liquidation monitor, and
/// serves a read-only status API plus Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "shieldmint-node",
    about = "ShieldMint confidential vault engine node",
    version,
    propagate_version = true
)]
pub struct NodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the engine.
    Run(RunArgs),
    /// Create the data directory, generate devnet keys and write a default
    /// config file.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Engine config file (JSON). Defaults to `config.json` in the data
    /// directory if present, built-in defaults otherwise.
    #[arg(long, short = 'c', env = "SHIELDMINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the key file and the vault database.
    #[arg(long, short = 'd', env = "SHIELDMINT_DATA_DIR", default_value = ".shieldmint")]
    pub data_dir: PathBuf,

    /// Port for the read-only status API.
    #[arg(long, env = "SHIELDMINT_API_PORT", default_value_t = 9841)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "SHIELDMINT_METRICS_PORT", default_value_t = 9842)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(long, env = "SHIELDMINT_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Devnet only: operator-set collateral price in whole dollars,
    /// republished on every oracle refresh.
    #[arg(long, env = "SHIELDMINT_PRICE")]
    pub price: Option<u128>,

    /// Override `risk.min_ratio_bps`.
    #[arg(long, env = "SHIELDMINT_MIN_RATIO_BPS")]
    pub min_ratio_bps: Option<u32>,

    /// Override `risk.liquidation_threshold_bps`.
    #[arg(long, env = "SHIELDMINT_LIQUIDATION_THRESHOLD_BPS")]
    pub liquidation_threshold_bps: Option<u32>,

    /// Override `monitor.interval_ms`.
    #[arg(long, env = "SHIELDMINT_SWEEP_INTERVAL_MS")]
    pub sweep_interval_ms: Option<u64>,
}

impl RunArgs {
    /// Apply flag overrides on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut EngineConfig) {
        if let Some(bps) = self.min_ratio_bps {
            config.risk.min_ratio_bps = bps;
        }
        if let Some(bps) = self.liquidation_threshold_bps {
            config.risk.liquidation_threshold_bps = bps;
        }
        if let Some(ms) = self.sweep_interval_ms {
            config.monitor.interval_ms = ms;
        }
    }
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "SHIELDMINT_DATA_DIR", default_value = ".shieldmint")]
    pub data_dir: PathBuf,

    /// Overwrite an existing key file.
    #[arg(long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        NodeCli::command().debug_assert();
    }

    #[test]
    fn overrides_replace_config_values() {
        let cli = NodeCli::parse_from([
            "shieldmint-node",
            "run",
            "--min-ratio-bps",
            "17500",
            "--sweep-interval-ms",
            "500",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = EngineConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.risk.min_ratio_bps, 17_500);
        assert_eq!(config.monitor.interval_ms, 500);
        assert_eq!(
            config.risk.liquidation_threshold_bps,
            EngineConfig::default().risk.liquidation_threshold_bps
        );
    }
}
