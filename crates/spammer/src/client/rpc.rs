//! Full-node JSON-RPC implementation of [`LedgerClient`].

use super::types::{
    Amount, BalanceResponse, CoinData, CoinPage, ExecuteResponse, JsonRpcRequest,
    JsonRpcResponse, TransactionBytesResponse,
};
use super::{ClientError, LedgerClient, SplitReceipt};
use crate::types::{Account, Address, Confirmation, Endpoint, GasObject, PreparedOperation};
use crate::workloads::{OperationSpec, Payload};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

const SUI_COIN_TYPE: &str = "0x2::sui::SUI";

/// Page size for coin listing.
const COIN_PAGE_LIMIT: usize = 50;

/// Upper bound on coins merged into a single funding operation.
const MAX_FUNDING_INPUTS: usize = 255;

/// HTTP timeout for a single RPC call. Execution waits for local effects,
/// so this has to cover a full confirmation.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// JSON-RPC client bound to one endpoint.
pub struct JsonRpcClient {
    endpoint: Endpoint,
    http: reqwest::Client,
    next_id: AtomicU64,
    reference_gas_price: OnceCell<u64>,
}

impl JsonRpcClient {
    /// Create a client for the given endpoint.
    pub fn new(endpoint: Endpoint) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            endpoint,
            http,
            next_id: AtomicU64::new(1),
            reference_gas_price: OnceCell::new(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ClientError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        trace!(method, endpoint = %self.endpoint, "RPC call");

        let response = self
            .http
            .post(self.endpoint.url())
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!("HTTP {status} from {method}")));
        }

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(format!("{method}: {e}")))?;

        if let Some(err) = body.error {
            return Err(ClientError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        body.result
            .ok_or_else(|| ClientError::InvalidResponse(format!("{method}: empty result")))
    }

    /// Reference gas price, fetched once per client.
    async fn reference_gas_price(&self) -> Result<u64, ClientError> {
        self.reference_gas_price
            .get_or_try_init(|| async {
                let price: Amount = self.call("suix_getReferenceGasPrice", json!([])).await?;
                debug!(endpoint = %self.endpoint, price = price.0, "Fetched reference gas price");
                Ok::<_, ClientError>(price.0)
            })
            .await
            .copied()
    }

    /// All coins owned by `owner` except those in `reserved`.
    async fn spendable_coins(
        &self,
        owner: &Address,
        reserved: &[String],
    ) -> Result<Vec<CoinData>, ClientError> {
        let mut coins = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page: CoinPage = self
                .call(
                    "suix_getCoins",
                    json!([owner.as_str(), SUI_COIN_TYPE, cursor, COIN_PAGE_LIMIT]),
                )
                .await?;

            coins.extend(
                page.data
                    .into_iter()
                    .filter(|coin| !reserved.contains(&coin.coin_object_id)),
            );

            match page.next_cursor {
                Some(next) if page.has_next_page => cursor = Some(next),
                _ => break,
            }
        }

        Ok(coins)
    }

    async fn sign_and_execute(
        &self,
        account: &Account,
        tx_bytes: &[u8],
    ) -> Result<ExecuteResponse, ClientError> {
        let signature = account.key().sign_transaction(tx_bytes);
        self.call(
            "sui_executeTransactionBlock",
            json!([
                BASE64.encode(tx_bytes),
                [signature],
                { "showEffects": true },
                "WaitForLocalExecution"
            ]),
        )
        .await
    }
}

fn decode_tx_bytes(response: TransactionBytesResponse) -> Result<Vec<u8>, ClientError> {
    BASE64
        .decode(response.tx_bytes)
        .map_err(|e| ClientError::InvalidResponse(format!("txBytes: {e}")))
}

/// Total a split must gather: every amount plus the split's own budget.
/// Saturates so an oversized request reads as unaffordable.
fn split_requirement(amounts: &[u64], gas_budget: u64) -> u64 {
    amounts
        .iter()
        .try_fold(gas_budget, |total, &amount| total.checked_add(amount))
        .unwrap_or(u64::MAX)
}

/// Overwrite the gas price of BCS-encoded transaction data.
///
/// The builder endpoints always encode the reference price. Their output ends
/// with the gas price, the gas budget (both u64 little-endian) and a
/// `None` expiration tag. The budget is checked against `gas_budget` so a
/// layout change is reported instead of corrupting the transaction.
fn apply_gas_price(
    mut tx_bytes: Vec<u8>,
    gas_price: u64,
    gas_budget: u64,
) -> Result<Vec<u8>, ClientError> {
    const TAIL: usize = 8 + 8 + 1;

    let len = tx_bytes.len();
    if len < TAIL
        || tx_bytes[len - 1] != 0
        || tx_bytes[len - 9..len - 1] != gas_budget.to_le_bytes()
    {
        return Err(ClientError::InvalidResponse(
            "txBytes: unexpected gas data layout".to_string(),
        ));
    }

    tx_bytes[len - TAIL..len - 9].copy_from_slice(&gas_price.to_le_bytes());
    Ok(tx_bytes)
}

#[async_trait]
impl LedgerClient for JsonRpcClient {
    async fn get_balance(&self, owner: &Address) -> Result<u64, ClientError> {
        let balance: BalanceResponse = self
            .call("suix_getBalance", json!([owner.as_str(), SUI_COIN_TYPE]))
            .await?;
        Ok(balance.total_balance)
    }

    async fn split(
        &self,
        account: &Account,
        reserved: &[String],
        amounts: &[u64],
        gas_budget: u64,
    ) -> Result<SplitReceipt, ClientError> {
        let required = split_requirement(amounts, gas_budget);

        let mut coins = self.spendable_coins(account.address(), reserved).await?;
        coins.sort_by(|a, b| b.balance.cmp(&a.balance));

        let mut inputs = Vec::new();
        let mut gathered = 0u64;
        for coin in coins.into_iter().take(MAX_FUNDING_INPUTS) {
            if gathered >= required {
                break;
            }
            gathered = gathered.saturating_add(coin.balance);
            inputs.push(coin.coin_object_id);
        }
        if gathered < required {
            return Err(ClientError::InsufficientFunds {
                required,
                available: gathered,
            });
        }

        let recipients = vec![account.address().as_str(); amounts.len()];
        let amounts: Vec<String> = amounts.iter().map(u64::to_string).collect();

        let unsigned: TransactionBytesResponse = self
            .call(
                "unsafe_paySui",
                json!([
                    account.address().as_str(),
                    inputs,
                    recipients,
                    amounts,
                    gas_budget.to_string()
                ]),
            )
            .await?;
        let tx_bytes = decode_tx_bytes(unsigned)?;

        let response = self.sign_and_execute(account, &tx_bytes).await?;
        let digest = response.digest.clone();
        let effects = response
            .effects
            .ok_or_else(|| ClientError::InvalidResponse(format!("{digest}: missing effects")))?;

        if !effects.status.is_success() {
            return Err(ClientError::ExecutionFailed {
                digest,
                error: effects.status.error.unwrap_or_default(),
            });
        }

        Ok(SplitReceipt {
            digest,
            cost: (&effects.gas_used).into(),
            created: effects
                .created
                .into_iter()
                .map(|o| o.reference.into())
                .collect(),
        })
    }

    async fn build_transaction(
        &self,
        account: &Account,
        gas: &GasObject,
        spec: &OperationSpec,
    ) -> Result<Vec<u8>, ClientError> {
        let reference = self.reference_gas_price().await?;
        if spec.gas_price < reference {
            return Err(ClientError::GasPriceTooLow {
                configured: spec.gas_price,
                reference,
            });
        }

        let sender = account.address().as_str();
        let budget = spec.gas_budget.to_string();

        let unsigned: TransactionBytesResponse = match &spec.payload {
            Payload::SelfTransfer(transfer) => {
                self.call(
                    "unsafe_transferSui",
                    json!([sender, gas.id(), budget, sender, transfer.amount.to_string()]),
                )
                .await?
            }
            Payload::MoveCall(call) => {
                self.call(
                    "unsafe_moveCall",
                    json!([
                        sender,
                        call.package,
                        call.module,
                        call.function,
                        [],
                        [],
                        gas.id(),
                        budget
                    ]),
                )
                .await?
            }
        };

        let tx_bytes = decode_tx_bytes(unsigned)?;
        if spec.gas_price == reference {
            return Ok(tx_bytes);
        }
        trace!(object = %gas.id(), price = spec.gas_price, reference, "Applying gas price");
        apply_gas_price(tx_bytes, spec.gas_price, spec.gas_budget)
    }

    async fn submit(
        &self,
        account: &Account,
        operation: &PreparedOperation,
    ) -> Result<Confirmation, ClientError> {
        let response = self.sign_and_execute(account, &operation.tx_bytes).await?;
        let digest = response.digest.clone();
        response
            .into_confirmation()
            .ok_or_else(|| ClientError::InvalidResponse(format!("{digest}: missing effects")))
    }
}
