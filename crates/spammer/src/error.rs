//! Error taxonomy for the load generator.

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::coordinator::CoordinatorError;
use crate::gas::FundingError;
use thiserror::Error;

/// Top-level error for a worker or the whole run.
#[derive(Debug, Error)]
pub enum SpammerError {
    /// Configuration is missing or inconsistent. Raised before any worker starts.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Funding the gas pool failed.
    #[error("Funding failed: {0}")]
    Funding(#[from] FundingError),

    /// The start barrier was aborted or misused.
    #[error("Start barrier failed: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// A network call failed outside of per-operation isolation.
    #[error("Network client error: {0}")]
    Client(#[from] ClientError),

    /// A worker task panicked or was cancelled.
    #[error("Worker {worker} terminated abnormally: {reason}")]
    WorkerTerminated { worker: usize, reason: String },
}

impl SpammerError {
    /// Whether this error must stop the affected worker (and with it the run).
    ///
    /// Per-operation build and submission failures never reach this type;
    /// they are captured in the round's outcomes.
    pub fn is_fatal(&self) -> bool {
        match self {
            SpammerError::Config(_)
            | SpammerError::Coordinator(_)
            | SpammerError::WorkerTerminated { .. } => true,
            SpammerError::Funding(e) => e.is_fatal(),
            SpammerError::Client(_) => false,
        }
    }
}
