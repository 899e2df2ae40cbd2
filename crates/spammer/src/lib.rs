//! Ledger Spammer
//!
//! A synthetic load generator that drives sustained transaction throughput
//! against a ledger network's full-node RPC, and reports per-round
//! throughput, latency and cost.
//!
//! # Architecture
//!
//! - **Gas Pool** ([`gas`]): splits an account's balance into independent
//!   fragments and recycles the change each spend leaves behind
//! - **Scheduler** ([`scheduler`]): builds one operation per fragment and
//!   fires a whole round at once, closed-loop or open-loop
//! - **Coordinator** ([`coordinator`]): start barrier so every account's
//!   stream begins at the same instant
//! - **Metrics** ([`metrics`]): per-round throughput, latency percentiles and
//!   fees, lifetime totals, optional flat-file output
//! - **Client** ([`client`]): the network boundary, with a JSON-RPC
//!   implementation
//!
//! # Example
//!
//! ```ignore
//! use ledger_spammer::{PrivateKey, Spammer, SpammerConfig, SubmissionMode};
//! use std::time::Duration;
//!
//! let config = SpammerConfig::new(vec![PrivateKey::new("suiprivkey1...")])
//!     .with_endpoints(vec!["http://127.0.0.1:9000".into()])
//!     .with_tps(20)
//!     .with_interval(Duration::from_secs(5))
//!     .with_mode(SubmissionMode::Closed);
//!
//! Spammer::new(config)?.run().await?;
//! ```

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gas;
pub mod keys;
pub mod metrics;
pub mod runner;
pub mod scheduler;
pub mod types;
pub mod workloads;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{ClientError, JsonRpcClient, LedgerClient};
pub use config::{ConfigError, PrivateKey, SpammerConfig};
pub use coordinator::{barrier, CoordinatorError, StartSignal, StartTicket};
pub use error::SpammerError;
pub use gas::{extract_change, FundingError, GasPool};
pub use metrics::{aggregate, LifetimeTotals, MetricsSample, RoundReporter};
pub use runner::{Spammer, Worker, WorkerSettings};
pub use scheduler::{build_round, fire_round, SubmissionMode};
pub use types::{Account, Endpoint, GasObject, Outcome, PreparedOperation, Settlement};
pub use workloads::{MoveCall, OperationSpec, Payload, SelfTransfer};
