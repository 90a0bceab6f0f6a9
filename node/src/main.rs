// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # RLN Node
//!
//! Entry point for the `rln-node` binary. Parses CLI arguments, initializes
//! logging and metrics, assembles the engine and anchoring adapter from
//! configuration, and serves the HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`: start the node
//! - `init`: write a default config and generate a prover key
//! - `status`: query a running node's status endpoint
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use rln_protocol::anchor::build_adapter;
use rln_protocol::config::{RlnConfig, RLN_CIRCUIT_ID};
use rln_protocol::crypto::ProverKeypair;
use rln_protocol::epoch::EpochClock;
use rln_protocol::proof::{build_backend, LocalBackend};
use rln_protocol::service::RlnService;
use rln_protocol::storage::RlnDb;
use rln_protocol::RlnEngine;

use cli::{Commands, RlnNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

const CONFIG_FILE: &str = "config.json";
const PROVER_KEY_FILE: &str = "prover.key";

/// How often the epoch gauges are refreshed and rollovers logged.
const EPOCH_TICK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RlnNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Reads the config file (explicit path, else `config.json` in the data
/// directory, else defaults) and applies CLI overrides.
fn load_config(args: &cli::RunArgs) -> Result<RlnConfig> {
    let path = args.config.clone().or_else(|| {
        let candidate = args.data_dir.join(CONFIG_FILE);
        candidate.exists().then_some(candidate)
    });

    let mut config = match &path {
        Some(path) => RlnConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RlnConfig::default(),
    };

    if let Some(secs) = args.epoch_secs {
        config.epoch_duration = Duration::from_secs(secs);
    }
    if let Some(max) = args.max_messages {
        config.max_messages_per_epoch = max;
    }
    if let Some(skew) = args.epoch_skew {
        config.epoch_skew_tolerance = skew;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Prover key from the flag, else from the data directory. A node without
/// one runs with an ephemeral key.
fn load_prover_key(args: &cli::RunArgs) -> Result<ProverKeypair> {
    if let Some(hex_key) = &args.prover_key {
        return ProverKeypair::from_hex(hex_key).context("invalid --prover-key");
    }

    let key_path = args.data_dir.join(PROVER_KEY_FILE);
    if key_path.exists() {
        let raw = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read prover key {}", key_path.display()))?;
        return ProverKeypair::from_hex(&raw)
            .with_context(|| format!("invalid prover key in {}", key_path.display()));
    }

    tracing::warn!(
        path = %key_path.display(),
        "no prover key found, using an ephemeral key; proofs will not verify after restart"
    );
    Ok(ProverKeypair::generate())
}

/// Starts the node: API server, metrics endpoint, and the epoch ticker.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "rln_node=info,rln_protocol=info,tower_http=info",
        LogFormat::from_str_lossy(&args.log_format),
    );

    let config = load_config(&args)?;
    tracing::info!(
        api = %format!("{}:{}", args.host, args.api_port),
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting rln-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = RlnDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Proof backend ---
    let prover = Arc::new(LocalBackend::new(load_prover_key(&args)?));
    tracing::info!(verifying_key = %prover.verifying_key().to_hex(), "local prover ready");
    let backend = build_backend(&config.proof_backend, Arc::clone(&prover))
        .context("failed to build proof backend")?;

    // --- Engine + anchoring ---
    let anchoring = build_adapter(&config.anchoring_backend, Some(db.clone()))
        .context("failed to build anchoring adapter")?;
    let clock = EpochClock::system(config.epoch_duration);
    let engine = Arc::new(
        RlnEngine::with_journal(config, clock, backend, db)
            .context("failed to start rln engine")?,
    );
    let service = Arc::new(RlnService::new(Arc::clone(&engine), anchoring));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: Arc::clone(&service),
        prover,
        metrics: Arc::clone(&node_metrics),
        anchor_rpc_token: args.anchor_rpc_token.as_deref().map(Arc::from),
    };
    if app_state.anchor_rpc_token.is_none() {
        tracing::warn!("no --anchor-rpc-token set, /anchor-rpc refuses all peers");
    }

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.host, args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", args.host, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Epoch ticker ---
    let engine_ref = Arc::clone(&engine);
    let service_ref = Arc::clone(&service);
    let metrics_ref = Arc::clone(&node_metrics);
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(EPOCH_TICK);
        let mut last = engine_ref.current_epoch();
        loop {
            interval.tick().await;
            let stats = engine_ref.stats();
            metrics_ref.current_epoch.set(stats.current_epoch.0 as i64);
            metrics_ref
                .active_nullifiers
                .set(stats.active_nullifiers as i64);
            if stats.current_epoch != last {
                tracing::info!(
                    from = last.0,
                    to = stats.current_epoch.0,
                    "epoch rolled over"
                );
                last = stats.current_epoch;
                match service_ref.prune_anchors().await {
                    Ok(0) => {}
                    Ok(pruned) => tracing::info!(pruned, "expired anchors pruned"),
                    Err(e) => tracing::warn!(error = %e, "anchor pruning failed"),
                }
            }
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    ticker.abort();
    tracing::info!("rln-node stopped");
    Ok(())
}

/// Writes a default config and a fresh prover key into the data directory.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("rln_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let config_path = data_dir.join(CONFIG_FILE);
    let key_path = data_dir.join(PROVER_KEY_FILE);
    for path in [&config_path, &key_path] {
        if path.exists() && !args.force {
            anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
        }
    }

    let config = RlnConfig::default();
    std::fs::write(&config_path, config.to_json_pretty()?)
        .with_context(|| format!("failed to write config to {}", config_path.display()))?;

    let keypair = ProverKeypair::generate();
    write_secret(&key_path, &keypair.secret_hex())?;
    let verifying_key = keypair.verifying_key().to_hex();

    tracing::info!(
        verifying_key = %verifying_key,
        key_path = %key_path.display(),
        "prover keypair generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Config         : {}", config_path.display());
    println!("  Prover key     : {}", key_path.display());
    println!("  Verifying key  : {}", verifying_key);

    Ok(())
}

fn write_secret(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write {}", path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.api_url.trim_end_matches('/'));
    let body: serde_json::Value = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?
        .error_for_status()?
        .json()
        .await
        .context("status response is not JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("rln-node {}", env!("CARGO_PKG_VERSION"));
    println!("circuit  {}", RLN_CIRCUIT_ID);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
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
