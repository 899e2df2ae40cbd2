//! Ledger Spammer CLI
//!
//! Generates sustained transaction load against one or more full-node
//! endpoints. Every flag falls back to an environment variable.

use clap::Parser;
use ledger_spammer::config::{
    DEFAULT_GAS_BUDGET, DEFAULT_GAS_PRICE, DEFAULT_INTERVAL, DEFAULT_TPS,
};
use ledger_spammer::{MoveCall, Payload, PrivateKey, Spammer, SpammerConfig, SubmissionMode};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Single-account fallback for the credential list.
const SINGLE_KEY_ENV: &str = "ACC1_PRIVATE_KEY";

#[derive(Parser)]
#[command(name = "ledger-spammer")]
#[command(about = "Transaction load generator for ledger full nodes")]
#[command(version)]
struct Cli {
    /// Load the whole configuration from a TOML file instead of flags
    #[arg(long, env = "SPAMMER_CONFIG")]
    config: Option<PathBuf>,

    /// Account private keys (comma-separated, suiprivkey1... or hex)
    #[arg(long, env = "ACCOUNT_PRIVATE_KEYS", value_delimiter = ',', hide_env_values = true)]
    private_keys: Vec<String>,

    /// RPC endpoints (comma-separated; none for the public default, one shared, or one per key)
    #[arg(long, env = "URL_OVERRIDE", value_delimiter = ',')]
    endpoints: Vec<String>,

    /// Expected number of workers
    #[arg(long, env = "WORKERS")]
    workers: Option<usize>,

    /// Operations per round
    #[arg(long, env = "TPS", default_value_t = DEFAULT_TPS)]
    tps: usize,

    /// Value of each funded gas fragment (defaults to the smallest usable value)
    #[arg(long, env = "FRAGMENT_VALUE")]
    fragment_value: Option<u64>,

    /// Gas budget per operation
    #[arg(long, env = "GAS_BUDGET", default_value_t = DEFAULT_GAS_BUDGET)]
    gas_budget: u64,

    /// Gas budget for the funding split
    #[arg(long, env = "FUNDING_GAS_BUDGET", default_value_t = DEFAULT_GAS_BUDGET)]
    funding_gas_budget: u64,

    /// Gas price
    #[arg(long, env = "GAS_PRICE", default_value_t = DEFAULT_GAS_PRICE)]
    gas_price: u64,

    /// Seconds between rounds
    #[arg(long, env = "PING_INTERVAL", default_value_t = DEFAULT_INTERVAL.as_secs())]
    interval: u64,

    /// Submission mode (closed, open)
    #[arg(long, env = "SUBMISSION_MODE", default_value = "closed")]
    mode: SubmissionMode,

    /// Call package::module::function instead of a self-transfer
    #[arg(long, env = "MOVE_CALL")]
    move_call: Option<MoveCall>,

    /// Append per-round metrics to this file
    #[arg(long, env = "METRICS_FILE")]
    metrics_file: Option<PathBuf>,

    /// Stop after this many rounds per worker
    #[arg(long, env = "ROUNDS")]
    rounds: Option<u64>,
}

impl Cli {
    fn into_config(self) -> Result<SpammerConfig, Box<dyn std::error::Error>> {
        if let Some(path) = self.config {
            return Ok(SpammerConfig::from_toml_file(path)?);
        }

        let mut keys = self.private_keys;
        if keys.is_empty() {
            if let Ok(key) = std::env::var(SINGLE_KEY_ENV) {
                keys.push(key);
            }
        }

        let payload = self
            .move_call
            .map(Payload::MoveCall)
            .unwrap_or_default();

        let mut config = SpammerConfig::new(keys.into_iter().map(PrivateKey::new).collect())
            .with_endpoints(self.endpoints)
            .with_tps(self.tps)
            .with_gas_budget(self.gas_budget)
            .with_funding_gas_budget(self.funding_gas_budget)
            .with_gas_price(self.gas_price)
            .with_interval(Duration::from_secs(self.interval))
            .with_mode(self.mode)
            .with_payload(payload);

        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(value) = self.fragment_value {
            config = config.with_fragment_value(value);
        }
        if let Some(path) = self.metrics_file {
            config = config.with_metrics_file(path);
        }
        if let Some(rounds) = self.rounds {
            config = config.with_rounds(rounds);
        }

        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Cli::parse().into_config().inspect_err(|e| {
        error!(error = %e, "Failed to load configuration");
    })?;

    let spammer = Spammer::new(config).inspect_err(|e| {
        error!(error = %e, "Invalid configuration");
    })?;
    info!(workers = spammer.workers(), "Spammer configured");

    match spammer.run().await {
        Ok(totals) => {
            let confirmed: u64 = totals.iter().map(|t| t.confirmed).sum();
            info!(workers = totals.len(), confirmed, "Run complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "Run aborted");
            Err(e.into())
        }
    }
}
