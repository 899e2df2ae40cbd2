//! Network client adapter boundary.
//!
//! The load-generation core only needs four operations from the network:
//! read a balance, split value into fragments, encode an operation against a
//! gas object and submit it. [`LedgerClient`] captures exactly those;
//! [`JsonRpcClient`] implements them over full-node JSON-RPC.

mod rpc;
pub mod types;

pub use rpc::JsonRpcClient;

use crate::types::{
    Account, Address, Confirmation, GasCost, GasObject, ObjectRef, PreparedOperation,
};
use crate::workloads::OperationSpec;
use async_trait::async_trait;

/// Errors from the network client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// HTTP/transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with something we could not interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Spendable value does not cover the requested amounts plus fees.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    /// Configured gas price is below the network's reference price.
    #[error("Gas price {configured} is below the reference gas price {reference}")]
    GasPriceTooLow { configured: u64, reference: u64 },

    /// The operation executed but the ledger reported a failure.
    #[error("Execution of {digest} failed: {error}")]
    ExecutionFailed { digest: String, error: String },

    /// The object is unknown, already spent, or at a different version.
    #[error("Object {0} is not available at the expected version")]
    ObjectUnavailable(String),
}

/// Result of a split (funding) operation.
#[derive(Debug, Clone)]
pub struct SplitReceipt {
    pub digest: String,
    pub cost: GasCost,
    /// Newly created fragments, in no particular order.
    pub created: Vec<ObjectRef>,
}

/// Operations the load-generation core requires from the network.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Total spendable value owned by `owner`, in smallest units.
    async fn get_balance(&self, owner: &Address) -> Result<u64, ClientError>;

    /// Split the account's value into fragments of `amounts`, owned by the
    /// same account, in a single operation.
    ///
    /// Objects listed in `reserved` belong to a gas pool and must not be
    /// used as the funding source.
    async fn split(
        &self,
        account: &Account,
        reserved: &[String],
        amounts: &[u64],
        gas_budget: u64,
    ) -> Result<SplitReceipt, ClientError>;

    /// Encode an operation paid for by `gas`. May resolve object versions,
    /// but must not execute anything.
    async fn build_transaction(
        &self,
        account: &Account,
        gas: &GasObject,
        spec: &OperationSpec,
    ) -> Result<Vec<u8>, ClientError>;

    /// Sign and execute a prepared operation, waiting for its effects.
    async fn submit(
        &self,
        account: &Account,
        operation: &PreparedOperation,
    ) -> Result<Confirmation, ClientError>;
}
