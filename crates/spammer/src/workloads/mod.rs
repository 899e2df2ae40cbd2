//! Benchmark payloads.
//!
//! Every operation in a round carries the same deterministic, cheap payload.
//! The payload is chosen once at configuration time.

mod move_call;
mod transfer;

pub use move_call::{MoveCall, MoveCallParseError};
pub use transfer::SelfTransfer;

use serde::Deserialize;

/// The fixed work each benchmark operation performs.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Transfer a token amount from the gas object back to the sender.
    SelfTransfer(SelfTransfer),
    /// Call a data-free entry function (create-then-destroy style no-op).
    MoveCall(MoveCall),
}

impl Payload {
    /// Value the payload moves out of the gas object besides fees.
    pub fn value_moved(&self) -> u64 {
        match self {
            Payload::SelfTransfer(transfer) => transfer.amount,
            Payload::MoveCall(_) => 0,
        }
    }

    /// Short name for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Payload::SelfTransfer(_) => "self_transfer",
            Payload::MoveCall(_) => "move_call",
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::SelfTransfer(SelfTransfer::default())
    }
}

/// Everything needed to encode one benchmark operation, except its gas object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationSpec {
    pub payload: Payload,
    /// Cost ceiling per operation, in smallest units.
    pub gas_budget: u64,
    /// Price per gas unit, encoded into every operation. Builds fail when it
    /// is below the network reference price.
    pub gas_price: u64,
}

impl OperationSpec {
    pub fn new(payload: Payload, gas_budget: u64, gas_price: u64) -> Self {
        Self {
            payload,
            gas_budget,
            gas_price,
        }
    }

    /// Smallest fragment value that can still pay for one operation.
    pub fn min_fragment_value(&self) -> u64 {
        self.gas_budget + self.payload.value_moved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_fragment_value_includes_moved_value() {
        let spec = OperationSpec::new(
            Payload::SelfTransfer(SelfTransfer { amount: 5 }),
            10_000_000,
            1_100,
        );
        assert_eq!(spec.min_fragment_value(), 10_000_005);

        let spec = OperationSpec::new(
            Payload::MoveCall("0x1::noop::run".parse().unwrap()),
            10_000_000,
            1_100,
        );
        assert_eq!(spec.min_fragment_value(), 10_000_000);
    }

    #[test]
    fn test_payload_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            payload: Payload,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
            [payload]
            kind = "move_call"
            package = "0xabc"
            module = "useless"
            function = "new"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.payload.name(), "move_call");
        assert_eq!(parsed.payload.value_moved(), 0);
    }
}
