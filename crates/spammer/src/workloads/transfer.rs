//! Self-transfer payload.

use serde::Deserialize;

/// Moves `amount` from the gas object into a new coin owned by the sender.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SelfTransfer {
    #[serde(default = "default_amount")]
    pub amount: u64,
}

fn default_amount() -> u64 {
    1
}

impl Default for SelfTransfer {
    fn default() -> Self {
        Self {
            amount: default_amount(),
        }
    }
}
