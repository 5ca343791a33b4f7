// Copyright (c) 2026 ShieldMint Contributors. MIT License.
// See LICENSE for details.

//! # ShieldMint Node
//!
//! Entry point for the `shieldmint-node` binary. Loads config and keys,
//! opens the vault database, assembles the engine, and runs three things
//! side by side until Ctrl+C or SIGTERM:
//!
//! - the oracle refresh loop (devnet: republishes the operator price),
//! - the liquidation monitor,
//! - consumed-proof pruning,
//! - the status API and the metrics endpoint.
//!
//! Subcommands:
//!
//! - `run`: start the engine
//! - `init`: create the data directory, keys and default config
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;

use shieldmint_protocol::cipher::fixed_point::price_units;
use shieldmint_protocol::config::{EngineConfig, CONTRACT_NAME, ENGINE_VERSION, STABLECOIN_SYMBOL};
use shieldmint_protocol::engine::{Engine, EngineKeys, EngineKeysFile};
use shieldmint_protocol::ledger::ChannelSettlement;
use shieldmint_protocol::monitor::LiquidationMonitor;
use shieldmint_protocol::oracle::PriceOracle;
use shieldmint_protocol::proof::Verifier;
use shieldmint_protocol::storage::VaultDB;
use shieldmint_protocol::types::AssetId;

use cli::{Commands, LogFormatArg, NodeCli};
use metrics::NodeMetrics;

const KEY_FILE: &str = "keys.json";
const CONFIG_FILE: &str = "config.json";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "shieldmint_node=info,shieldmint_protocol=info,tower_http=info",
        args.log_format,
    );

    // --- Config ---
    let mut config = load_config(&args)?;
    args.apply_overrides(&mut config);
    config.validate().context("invalid engine config")?;

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        min_ratio_bps = config.risk.min_ratio_bps,
        liquidation_threshold_bps = config.risk.liquidation_threshold_bps,
        "starting shieldmint-node"
    );

    // --- Keys and storage ---
    let keys = load_keys(&args.data_dir)?;
    let db_path = args.data_dir.join("db");
    let db = VaultDB::open(&db_path)
        .with_context(|| format!("failed to open vault database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), vaults = db.vault_count(), "database opened");

    // --- Engine ---
    let (settlement, mut notices) = ChannelSettlement::new();
    let engine = Engine::assemble(
        &config,
        keys,
        db,
        Arc::new(shieldmint_protocol::clock::SystemClock),
        Arc::new(settlement),
    )
    .context("failed to assemble engine")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Settlement happens out of band; the node just records the hand-off.
    let settlement_log = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            tracing::info!(
                vault_id = %notice.vault_id,
                owner = %notice.owner,
                initiator = %notice.initiator,
                "vault handed to settlement"
            );
        }
    });

    // --- Oracle refresh ---
    let asset = AssetId::default();
    let operator_price = match args.price {
        Some(dollars) => Some(
            price_units(dollars)
                .with_context(|| format!("price {dollars} out of range"))?,
        ),
        None => None,
    };
    let refresh = tokio::spawn(refresh_prices(
        Arc::clone(&engine.oracle),
        Arc::clone(&engine.feed),
        asset,
        operator_price,
        shutdown_rx.clone(),
    ));

    // --- Consumed-proof pruning ---
    let prune = tokio::spawn(prune_consumed(
        Arc::clone(engine.ledger.verifier()),
        config.verifier.prune_interval(),
        shutdown_rx.clone(),
    ));

    // --- Monitor ---
    let monitor = Arc::new(LiquidationMonitor::new(
        Arc::clone(&engine.ledger),
        config.monitor.clone(),
        Arc::clone(&engine.clock),
    ));
    let monitor_task = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        let shutdown = shutdown_rx.clone();
        async move { monitor.run(shutdown).await }
    });

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);
    let recorder = metrics::spawn_event_recorder(
        Arc::clone(&node_metrics),
        Arc::clone(&engine.ledger),
        Arc::clone(&monitor),
    );

    // --- API server ---
    let api_router = api::create_router(api::AppState {
        version: format!("{} (engine {ENGINE_VERSION})", env!("CARGO_PKG_VERSION")),
        network: "devnet".to_string(),
        ledger: Arc::clone(&engine.ledger),
        monitor: Arc::clone(&monitor),
    });
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    tracing::info!("status API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_task.await {
        tracing::warn!(error = %e, "monitor task ended abnormally");
    }
    if let Err(e) = refresh.await {
        tracing::warn!(error = %e, "oracle refresh task ended abnormally");
    }
    if let Err(e) = prune.await {
        tracing::warn!(error = %e, "pruning task ended abnormally");
    }
    recorder.abort();
    settlement_log.abort();

    engine.ledger.db().flush().context("failed to flush vault database")?;
    tracing::info!("shieldmint-node stopped");
    Ok(())
}

/// Keep the oracle cache warm. With an operator price set, republish it
/// stamped now before every refresh.
async fn refresh_prices(
    oracle: Arc<PriceOracle>,
    feed: Arc<shieldmint_protocol::oracle::StaticPriceFeed>,
    asset: AssetId,
    operator_price: Option<u128>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(oracle.config().refresh_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        if let Some(price) = operator_price {
            feed.set_price(asset.clone(), price, chrono::Utc::now());
        }
        if let Err(e) = oracle.refresh(&asset).await {
            tracing::warn!(%asset, error = %e, retryable = e.is_retryable(), "oracle refresh failed");
        }
    }
}

/// Periodically drop consumed-proof entries whose bindings have lapsed.
async fn prune_consumed(
    verifier: Arc<Verifier>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        match verifier.prune_consumed() {
            Ok(0) => {}
            Ok(pruned) => tracing::info!(pruned, "pruned consumed proofs"),
            Err(e) => tracing::warn!(error = %e, "consumed-proof pruning failed"),
        }
    }
}

fn load_config(args: &cli::RunArgs) -> Result<EngineConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => {
            let default = args.data_dir.join(CONFIG_FILE);
            if !default.exists() {
                return Ok(EngineConfig::default());
            }
            default
        }
    };
    EngineConfig::from_json_file(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn load_keys(data_dir: &Path) -> Result<EngineKeys> {
    let path = data_dir.join(KEY_FILE);
    let text = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "failed to read {} (run `shieldmint-node init` first)",
            path.display()
        )
    })?;
    let file: EngineKeysFile =
        serde_json::from_str(&text).with_context(|| format!("malformed key file {}", path.display()))?;
    EngineKeys::from_file(&file).with_context(|| format!("invalid key in {}", path.display()))
}

/// Create the data directory, generate devnet keys and write a default
/// config.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("shieldmint_node=info", LogFormatArg::Pretty);

    let data_dir = &args.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(KEY_FILE);
    if key_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            key_path.display()
        );
    }

    let keys = EngineKeys::generate();
    let body = serde_json::to_string_pretty(&keys.to_file())?;
    std::fs::write(&key_path, body)
        .with_context(|| format!("failed to write key file {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let config_path = data_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        let body = serde_json::to_string_pretty(&EngineConfig::default())?;
        std::fs::write(&config_path, body)
            .with_context(|| format!("failed to write config {}", config_path.display()))?;
    }

    tracing::info!(
        key_path = %key_path.display(),
        coprocessor = %keys.coprocessor_attestor.public_key(),
        settlement = %keys.settlement.public_key(),
        "devnet keys generated"
    );

    println!("Node initialized.");
    println!("  Data directory     : {}", data_dir.display());
    println!("  Key file           : {}", key_path.display());
    println!("  Config             : {}", config_path.display());
    println!("  Co-processor key   : {}", keys.coprocessor_attestor.public_key());
    println!("  Input attestor key : {}", keys.input_attestor.public_key());
    println!("  Settlement key     : {}", keys.settlement.public_key());
    Ok(())
}

fn print_version() {
    println!("shieldmint-node {}", env!("CARGO_PKG_VERSION"));
    println!("engine          {ENGINE_VERSION}");
    println!("contract        {CONTRACT_NAME}");
    println!("stablecoin      {STABLECOIN_SYMBOL}");
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
