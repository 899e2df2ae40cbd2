//! Configuration for a spammer run.

use crate::keys::{AccountKey, KeyError};
use crate::scheduler::SubmissionMode;
use crate::types::{Account, Endpoint};
use crate::workloads::{OperationSpec, Payload};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default cost ceiling per operation, in smallest units.
pub const DEFAULT_GAS_BUDGET: u64 = 10_000_000;

/// Default price per gas unit.
pub const DEFAULT_GAS_PRICE: u64 = 1_100;

/// Default number of operations per round.
pub const DEFAULT_TPS: usize = 5;

/// Default pause between closed-loop rounds.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Invalid or inconsistent configuration. Always raised before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No account credentials configured")]
    NoAccounts,

    #[error("Credential {index} is invalid: {source}")]
    InvalidKey {
        index: usize,
        #[source]
        source: KeyError,
    },

    #[error("Credentials {first} and {second} resolve to the same account {address}")]
    DuplicateAccount {
        first: usize,
        second: usize,
        address: String,
    },

    #[error("{endpoints} endpoints for {accounts} accounts, expected 0, 1 or {accounts}")]
    EndpointCount { endpoints: usize, accounts: usize },

    #[error("Expected {expected} workers but {accounts} accounts are configured")]
    WorkerCount { expected: usize, accounts: usize },

    #[error("Target TPS must be greater than zero")]
    ZeroTps,

    #[error("Gas budget must be greater than zero")]
    ZeroGasBudget,

    #[error("Fragment value {fragment_value} cannot pay for one operation (minimum {minimum})")]
    FragmentTooSmall { fragment_value: u64, minimum: u64 },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A private key as configured. Never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    fn decode(&self) -> Result<AccountKey, KeyError> {
        AccountKey::parse(&self.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Configuration for a spammer run.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpammerConfig {
    /// One credential per worker.
    pub private_keys: Vec<PrivateKey>,

    /// RPC endpoints: empty uses the public default, one is shared by every
    /// worker, otherwise paired with `private_keys` by position.
    pub endpoints: Vec<String>,

    /// Expected worker count, checked against the number of credentials.
    pub workers: Option<usize>,

    /// Operations per round (the number of gas objects funded per worker).
    pub tps: usize,

    /// Value of each funded fragment. Defaults to the smallest value that
    /// can pay for one operation.
    pub fragment_value: Option<u64>,

    /// Cost ceiling per benchmark operation.
    pub gas_budget: u64,

    /// Cost ceiling for the funding (split) operation.
    pub funding_gas_budget: u64,

    /// Price per gas unit.
    pub gas_price: u64,

    /// Pause between closed-loop rounds and between open-loop episodes.
    pub interval_secs: u64,

    pub mode: SubmissionMode,

    pub payload: Payload,

    /// Append per-round metrics to this file.
    pub metrics_file: Option<PathBuf>,

    /// Stop each worker after this many rounds. Unset runs until the process
    /// is terminated.
    pub rounds: Option<u64>,
}

impl Default for SpammerConfig {
    fn default() -> Self {
        Self {
            private_keys: Vec::new(),
            endpoints: Vec::new(),
            workers: None,
            tps: DEFAULT_TPS,
            fragment_value: None,
            gas_budget: DEFAULT_GAS_BUDGET,
            funding_gas_budget: DEFAULT_GAS_BUDGET,
            gas_price: DEFAULT_GAS_PRICE,
            interval_secs: DEFAULT_INTERVAL.as_secs(),
            mode: SubmissionMode::default(),
            payload: Payload::default(),
            metrics_file: None,
            rounds: None,
        }
    }
}

impl SpammerConfig {
    /// Create a configuration for the given credentials with default settings.
    pub fn new(private_keys: Vec<PrivateKey>) -> Self {
        Self {
            private_keys,
            ..Default::default()
        }
    }

    /// Load a configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Set the RPC endpoints.
    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set the expected worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set the number of operations per round.
    pub fn with_tps(mut self, tps: usize) -> Self {
        self.tps = tps;
        self
    }

    /// Set the value of each funded fragment.
    pub fn with_fragment_value(mut self, value: u64) -> Self {
        self.fragment_value = Some(value);
        self
    }

    /// Set the per-operation gas budget.
    pub fn with_gas_budget(mut self, budget: u64) -> Self {
        self.gas_budget = budget;
        self
    }

    /// Set the funding operation's gas budget.
    pub fn with_funding_gas_budget(mut self, budget: u64) -> Self {
        self.funding_gas_budget = budget;
        self
    }

    /// Set the gas price.
    pub fn with_gas_price(mut self, price: u64) -> Self {
        self.gas_price = price;
        self
    }

    /// Set the round interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = interval.as_secs();
        self
    }

    /// Set the submission mode.
    pub fn with_mode(mut self, mode: SubmissionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the benchmark payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Append metrics to a file.
    pub fn with_metrics_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_file = Some(path.into());
        self
    }

    /// Stop after a fixed number of rounds per worker.
    pub fn with_rounds(mut self, rounds: u64) -> Self {
        self.rounds = Some(rounds);
        self
    }

    /// Pause between rounds.
    pub fn round_interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// The operation every worker submits.
    pub fn operation_spec(&self) -> OperationSpec {
        OperationSpec::new(self.payload.clone(), self.gas_budget, self.gas_price)
    }

    /// Value of each funded fragment.
    pub fn fragment_value(&self) -> u64 {
        self.fragment_value
            .unwrap_or_else(|| self.operation_spec().min_fragment_value())
    }

    /// Check the configuration without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve_workers().map(|_| ())
    }

    /// Resolve accounts and pair each with its endpoint.
    ///
    /// Performs every check of [`SpammerConfig::validate`].
    pub fn resolve_workers(&self) -> Result<Vec<(Account, Endpoint)>, ConfigError> {
        if self.tps == 0 {
            return Err(ConfigError::ZeroTps);
        }
        if self.gas_budget == 0 {
            return Err(ConfigError::ZeroGasBudget);
        }
        let minimum = self.operation_spec().min_fragment_value();
        if self.fragment_value() < minimum {
            return Err(ConfigError::FragmentTooSmall {
                fragment_value: self.fragment_value(),
                minimum,
            });
        }

        let accounts = self.accounts()?;
        if let Some(expected) = self.workers {
            if expected != accounts.len() {
                return Err(ConfigError::WorkerCount {
                    expected,
                    accounts: accounts.len(),
                });
            }
        }

        let endpoints: Vec<Endpoint> = match self.endpoints.len() {
            0 => vec![Endpoint::default(); accounts.len()],
            1 => vec![Endpoint::new(self.endpoints[0].clone()); accounts.len()],
            n if n == accounts.len() => {
                self.endpoints.iter().cloned().map(Endpoint::new).collect()
            }
            n => {
                return Err(ConfigError::EndpointCount {
                    endpoints: n,
                    accounts: accounts.len(),
                })
            }
        };

        Ok(accounts.into_iter().zip(endpoints).collect())
    }

    fn accounts(&self) -> Result<Vec<Account>, ConfigError> {
        if self.private_keys.is_empty() {
            return Err(ConfigError::NoAccounts);
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut accounts = Vec::with_capacity(self.private_keys.len());
        for (index, key) in self.private_keys.iter().enumerate() {
            let key = key
                .decode()
                .map_err(|source| ConfigError::InvalidKey { index, source })?;
            let account = Account::new(key);
            let address = account.address().as_str().to_string();
            if let Some(&first) = seen.get(&address) {
                return Err(ConfigError::DuplicateAccount {
                    first,
                    second: index,
                    address,
                });
            }
            seen.insert(address, index);
            accounts.push(account);
        }
        Ok(accounts)
    }
}
