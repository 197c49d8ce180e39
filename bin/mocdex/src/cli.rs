use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use url::Url;

/// Where transactions are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum BackendKind {
    /// A JSON-RPC node with unlocked accounts.
    Rpc,
    /// In-memory chain, nothing is sent anywhere.
    Simulated,
}

#[derive(Parser)]
#[command(name = "mocdex")]
#[command(
    author,
    version,
    about = "Deploy the upgradeable order book exchange and its markets"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "MOCDEX_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the deployment configuration file.
    ///
    /// Values of the `[default]` table apply to every network and are
    /// overridden by the network's own table, then by `MOCDEX_<NETWORK>__<KEY>`
    /// environment variables.
    #[arg(short, long, env = "MOCDEX_CONFIG", default_value = "deploy.toml")]
    pub config: PathBuf,

    /// The network section to deploy.
    #[arg(short, long, env = "MOCDEX_NETWORK", default_value = "development")]
    pub network: String,

    /// Transaction backend.
    #[arg(long, env = "MOCDEX_BACKEND", default_value_t = BackendKind::Rpc)]
    pub backend: BackendKind,

    /// The URL of the JSON-RPC node.
    #[arg(long, alias = "rpc", env = "MOCDEX_RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub rpc_url: Url,

    /// Directory of compiled contract artifacts, one `<Name>.json` per unit.
    #[arg(long, env = "MOCDEX_ARTIFACTS", default_value = "build/contracts")]
    pub artifacts: PathBuf,

    /// Account to send from. Defaults to the node's first unlocked account.
    #[arg(long, env = "MOCDEX_FROM")]
    pub from: Option<Address>,

    /// Milliseconds between two receipt polls.
    #[arg(long, env = "MOCDEX_POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Receipt polls before a transaction is considered lost.
    #[arg(long, env = "MOCDEX_MAX_POLLS", default_value_t = 240)]
    pub max_polls: usize,

    /// Write the run summary as JSON to this path.
    #[arg(long, env = "MOCDEX_SUMMARY_OUT")]
    pub summary_out: Option<PathBuf>,

    /// Print the resolved configuration and exit without deploying.
    #[arg(long, env = "MOCDEX_PRINT_CONFIG")]
    pub print_config: bool,
}
