//! Core data model shared by the pool, scheduler and aggregator.

use crate::keys::AccountKey;
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Smallest-unit amounts per display unit (MIST per SUI).
pub const UNITS_PER_COIN: u64 = 1_000_000_000;

/// Public testnet full node used when no endpoint override is configured.
pub const DEFAULT_ENDPOINT: &str = "https://fullnode.testnet.sui.io:443";

/// A `0x`-prefixed hex account address.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    /// Wrap an already-normalized address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Build an address from its 32 raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines: `0x1234…abcd`.
    pub fn short(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 12 {
            return self.0.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

/// A signing identity. Immutable once loaded; one per worker.
#[derive(Clone)]
pub struct Account {
    address: Address,
    key: Arc<AccountKey>,
}

impl Account {
    /// Create an account from its signing key, deriving the address.
    pub fn new(key: AccountKey) -> Self {
        Self {
            address: key.address(),
            key: Arc::new(key),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn key(&self) -> &AccountKey {
        &self.key
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Handle to a specific RPC target.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn url(&self) -> &str {
        &self.0
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Versioned reference to an on-ledger object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub object_id: String,
    pub version: u64,
    pub digest: String,
}

/// A discrete, spendable value fragment owned by an account.
///
/// Spent at most once: ownership moves into the [`PreparedOperation`] that
/// pays with it, and the only way back into a pool is as change extracted
/// from a settled [`Outcome`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasObject {
    pub reference: ObjectRef,
    pub owner: Address,
    /// Known value in smallest units, if tracked.
    pub value: Option<u64>,
}

impl GasObject {
    pub fn id(&self) -> &str {
        &self.reference.object_id
    }
}

/// Gas charged by a confirmed operation, in smallest units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GasCost {
    pub computation: u64,
    pub storage: u64,
    pub rebate: u64,
}

impl GasCost {
    /// Net charge: `computation + storage - rebate`. May be negative.
    pub fn net(&self) -> i64 {
        self.computation as i64 + self.storage as i64 - self.rebate as i64
    }
}

/// An encoded, not-yet-submitted unit of work bound to one gas object.
#[derive(Debug)]
pub struct PreparedOperation {
    /// Position within its round (0-based).
    pub index: usize,
    pub gas: GasObject,
    /// Unsigned transaction with the gas budget and price already encoded.
    pub tx_bytes: Vec<u8>,
    /// Value the payload moves out of the gas object besides fees.
    pub value_moved: u64,
}

/// Confirmation data returned by the network for an executed operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub digest: String,
    /// Whether execution succeeded on the ledger.
    pub success: bool,
    pub error: Option<String>,
    pub cost: GasCost,
    /// New reference of the gas object after the spend, if it survived.
    pub gas_change: Option<ObjectRef>,
}

/// How a submission settled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    Confirmed(Confirmation),
    Failed { reason: String },
}

/// Result of submitting one prepared operation.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub index: usize,
    /// The gas object that paid for the operation.
    pub gas: GasObject,
    pub value_moved: u64,
    pub started: Instant,
    pub finished: Instant,
    pub submitted_at: SystemTime,
    pub settled_at: SystemTime,
    pub settlement: Settlement,
}

impl Outcome {
    /// Confirmation data for a confirmed, successfully executed operation.
    pub fn confirmed(&self) -> Option<&Confirmation> {
        match &self.settlement {
            Settlement::Confirmed(c) if c.success => Some(c),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.confirmed().is_some()
    }

    /// Wall-clock latency of this submission.
    pub fn latency(&self) -> std::time::Duration {
        self.finished.saturating_duration_since(self.started)
    }

    /// Unique confirmation identifier, if the network returned one.
    pub fn digest(&self) -> Option<&str> {
        match &self.settlement {
            Settlement::Confirmed(c) => Some(&c.digest),
            Settlement::Failed { .. } => None,
        }
    }
}

/// Render an amount in smallest units as display units.
pub fn format_coins(units: i64) -> String {
    format!("{:.9}", units as f64 / UNITS_PER_COIN as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_cost_net_can_be_negative() {
        let cost = GasCost {
            computation: 1_000,
            storage: 2_000,
            rebate: 5_000,
        };
        assert_eq!(cost.net(), -2_000);
    }

    #[test]
    fn test_address_short_form() {
        let addr = Address::from_bytes(&[0xab; 32]);
        assert_eq!(addr.short(), "0xabab…abab");
        assert_eq!(addr.as_str().len(), 66);
    }

    #[test]
    fn test_address_short_form_on_multibyte_input() {
        let addr = Address::new("0xé€é€é€é€é€é€é€é€");
        assert_eq!(addr.short(), "0xé€é€…é€é€");

        let addr = Address::new("0x€€€€");
        assert_eq!(addr.short(), "0x€€€€");
    }

    #[test]
    fn test_format_coins() {
        assert_eq!(format_coins(1_500_000_000), "1.500000000");
        assert_eq!(format_coins(0), "0.000000000");
    }
}
