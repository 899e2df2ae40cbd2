//! Types for JSON-RPC client communication.

use crate::types::{Confirmation, GasCost, ObjectRef};
use serde::{Deserialize, Deserializer, Serialize};

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: serde_json::Value,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// A bare amount, as returned by `suix_getReferenceGasPrice`.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct Amount(#[serde(deserialize_with = "lenient_u64")] pub u64);

/// Response from `suix_getBalance`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    #[serde(deserialize_with = "lenient_u64")]
    pub total_balance: u64,
}

/// One page from `suix_getCoins`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinPage {
    pub data: Vec<CoinData>,
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinData {
    pub coin_object_id: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub balance: u64,
}

/// Unsigned transaction returned by the node's builder endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionBytesResponse {
    /// Base64-encoded transaction data.
    pub tx_bytes: String,
}

/// Response from `sui_executeTransactionBlock`.
#[derive(Debug, Deserialize)]
pub struct ExecuteResponse {
    pub digest: String,
    pub effects: Option<TransactionEffects>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEffects {
    pub status: ExecutionStatus,
    pub gas_used: GasCostSummary,
    #[serde(default)]
    pub created: Vec<OwnedObjectRef>,
    pub gas_object: Option<OwnedObjectRef>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionStatus {
    pub status: String,
    pub error: Option<String>,
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasCostSummary {
    #[serde(deserialize_with = "lenient_u64")]
    pub computation_cost: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub storage_cost: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub storage_rebate: u64,
}

impl From<&GasCostSummary> for GasCost {
    fn from(summary: &GasCostSummary) -> Self {
        GasCost {
            computation: summary.computation_cost,
            storage: summary.storage_cost,
            rebate: summary.storage_rebate,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OwnedObjectRef {
    pub reference: RpcObjectRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcObjectRef {
    pub object_id: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub version: u64,
    pub digest: String,
}

impl From<RpcObjectRef> for ObjectRef {
    fn from(r: RpcObjectRef) -> Self {
        ObjectRef {
            object_id: r.object_id,
            version: r.version,
            digest: r.digest,
        }
    }
}

impl ExecuteResponse {
    /// Convert to a confirmation, or `None` if the node returned no effects.
    pub fn into_confirmation(self) -> Option<Confirmation> {
        let effects = self.effects?;
        Some(Confirmation {
            digest: self.digest,
            success: effects.status.is_success(),
            error: effects.status.error.clone(),
            cost: GasCost::from(&effects.gas_used),
            gas_change: effects.gas_object.map(|o| o.reference.into()),
        })
    }
}

/// Amounts arrive as JSON numbers or decimal strings depending on the field.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_response_into_confirmation() {
        let json = r#"{
            "digest": "9XfG",
            "effects": {
                "status": { "status": "success" },
                "gasUsed": {
                    "computationCost": "1000000",
                    "storageCost": "1976000",
                    "storageRebate": "978120",
                    "nonRefundableStorageFee": "9880"
                },
                "gasObject": {
                    "owner": { "AddressOwner": "0x1" },
                    "reference": { "objectId": "0xgas", "version": 42, "digest": "abc" }
                }
            }
        }"#;

        let response: ExecuteResponse = serde_json::from_str(json).unwrap();
        let confirmation = response.into_confirmation().unwrap();

        assert!(confirmation.success);
        assert_eq!(confirmation.digest, "9XfG");
        assert_eq!(confirmation.cost.net(), 1_000_000 + 1_976_000 - 978_120);
        let change = confirmation.gas_change.unwrap();
        assert_eq!(change.object_id, "0xgas");
        assert_eq!(change.version, 42);
    }

    #[test]
    fn test_failed_execution_status() {
        let json = r#"{
            "digest": "F41L",
            "effects": {
                "status": { "status": "failure", "error": "InsufficientGas" },
                "gasUsed": { "computationCost": 5, "storageCost": 0, "storageRebate": 0 }
            }
        }"#;

        let response: ExecuteResponse = serde_json::from_str(json).unwrap();
        let confirmation = response.into_confirmation().unwrap();

        assert!(!confirmation.success);
        assert_eq!(confirmation.error.as_deref(), Some("InsufficientGas"));
        assert!(confirmation.gas_change.is_none());
    }

    #[test]
    fn test_balance_parses_string_amount() {
        let response: BalanceResponse =
            serde_json::from_str(r#"{"coinType":"0x2::sui::SUI","totalBalance":"100000000"}"#)
                .unwrap();
        assert_eq!(response.total_balance, 100_000_000);
    }
}
