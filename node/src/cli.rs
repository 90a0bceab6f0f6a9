//! # CLI Interface
//!
//! Defines the command-line argument structure for `rln-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.
//!
//! Flags passed to `run` override the values read from the config file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// RLN node.
///
/// Serves rate-limited anonymous messaging and reporting for a group:
/// proofs are issued and verified locally, nullifier use is anchored in a
/// shared ledger, and Prometheus metrics are exposed on a separate port.
#[derive(Parser, Debug)]
#[command(
    name = "rln-node",
    about = "Rate-limiting nullifier node",
    version,
    propagate_version = true
)]
pub struct RlnNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the RLN node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a data directory: default config plus a fresh prover key.
    Init(InitArgs),
    /// Query the status of a running node via its API.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (JSON).
    ///
    /// When omitted, the node looks for `config.json` in the data directory
    /// and falls back to built-in defaults.
    #[arg(long, short = 'c', env = "RLN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the ledger journal, anchors, and prover key.
    #[arg(long, short = 'd', env = "RLN_DATA_DIR", default_value = "./rln-data")]
    pub data_dir: PathBuf,

    /// Address the API binds to. Identity secrets arrive on `/rln/send`, so
    /// keep this on loopback unless a TLS proxy sits in front.
    #[arg(long, env = "RLN_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the REST, proof service, and anchoring JSON-RPC API.
    #[arg(long, env = "RLN_API_PORT", default_value_t = 9841)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "RLN_METRICS_PORT", default_value_t = 9842)]
    pub metrics_port: u16,

    /// Hex-encoded Ed25519 prover key seed.
    ///
    /// If not provided, the node reads `prover.key` from the data directory.
    #[arg(long, env = "RLN_PROVER_KEY", hide_env_values = true)]
    pub prover_key: Option<String>,

    /// Epoch length in seconds.
    #[arg(long, env = "RLN_EPOCH_SECS")]
    pub epoch_secs: Option<u64>,

    /// Messages allowed per identity per epoch.
    #[arg(long, env = "RLN_MAX_MESSAGES")]
    pub max_messages: Option<u32>,

    /// Epochs of skew accepted when verifying (0 = strict).
    #[arg(long, env = "RLN_EPOCH_SKEW")]
    pub epoch_skew: Option<u64>,

    /// Bearer token peers present on `/anchor-rpc`.
    ///
    /// Without one the node does not serve its anchoring store.
    #[arg(long, env = "RLN_ANCHOR_RPC_TOKEN", hide_env_values = true)]
    pub anchor_rpc_token: Option<String>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "RLN_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "RLN_DATA_DIR", default_value = "./rln-data")]
    pub data_dir: PathBuf,

    /// Overwrite an existing config and prover key.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running node.
    #[arg(long, env = "RLN_API_URL", default_value = "http://127.0.0.1:9841")]
    pub api_url: String,
}
