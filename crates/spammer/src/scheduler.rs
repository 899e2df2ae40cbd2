//! Round building and submission.
//!
//! A round is one wave of operations, one per gas object, dispatched all at
//! once. The round width is the only throughput lever: there is no smoothing
//! inside a round, only the pause between rounds in closed-loop mode.
//!
//! Submission has settle-all semantics: every operation in the round is
//! awaited to completion and its result captured, success or failure. One
//! failed submission never cancels its siblings.

use crate::client::LedgerClient;
use crate::types::{Account, GasObject, Outcome, PreparedOperation, Settlement};
use crate::workloads::OperationSpec;
use futures::future::join_all;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::{Instant, SystemTime};
use tracing::{debug, warn};

/// How consecutive rounds are chained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    /// Wait for the round to settle, aggregate, sleep the round interval, then
    /// submit a fresh round of the configured width.
    #[default]
    Closed,

    /// As soon as a round settles, submit the next one using only the change
    /// it produced. Stops when no change remains.
    Open,
}

impl FromStr for SubmissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "closed" | "closed-loop" => Ok(SubmissionMode::Closed),
            "open" | "open-loop" | "pipelined" => Ok(SubmissionMode::Open),
            _ => Err(format!("Unknown submission mode: {}", s)),
        }
    }
}

impl fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionMode::Closed => f.write_str("closed-loop"),
            SubmissionMode::Open => f.write_str("open-loop"),
        }
    }
}

/// Prepared operations for one round.
#[derive(Debug, Default)]
pub struct BuiltRound {
    pub operations: Vec<PreparedOperation>,
    /// Gas objects whose operation could not be encoded. They are dropped
    /// from the round and not returned to the pool.
    pub build_failures: usize,
}

impl BuiltRound {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Encode one operation per gas object.
///
/// Encoding failures are isolated to their operation: logged and excluded,
/// never aborting the round. Indices are assigned to the operations that
/// made it into the round.
pub async fn build_round(
    client: &dyn LedgerClient,
    account: &Account,
    gas_objects: Vec<GasObject>,
    spec: &OperationSpec,
) -> BuiltRound {
    let builds = gas_objects.into_iter().map(|gas| async move {
        let result = client.build_transaction(account, &gas, spec).await;
        (gas, result)
    });

    let mut round = BuiltRound::default();
    for (gas, result) in join_all(builds).await {
        match result {
            Ok(tx_bytes) => {
                round.operations.push(PreparedOperation {
                    index: round.operations.len(),
                    gas,
                    tx_bytes,
                    value_moved: spec.payload.value_moved(),
                });
            }
            Err(e) => {
                warn!(object = %gas.id(), error = %e, "Failed to build operation");
                round.build_failures += 1;
            }
        }
    }

    debug!(
        prepared = round.operations.len(),
        failed = round.build_failures,
        "Round built"
    );
    round
}

/// Submit every operation concurrently and wait for all of them to settle.
///
/// Outcomes are returned in operation order; completion order is not
/// observable through the result.
pub async fn fire_round(
    client: &dyn LedgerClient,
    account: &Account,
    operations: Vec<PreparedOperation>,
) -> Vec<Outcome> {
    join_all(
        operations
            .into_iter()
            .map(|operation| submit_one(client, account, operation)),
    )
    .await
}

async fn submit_one(
    client: &dyn LedgerClient,
    account: &Account,
    operation: PreparedOperation,
) -> Outcome {
    let submitted_at = SystemTime::now();
    let started = Instant::now();

    let result = client.submit(account, &operation).await;

    let finished = Instant::now();
    let settled_at = SystemTime::now();

    let settlement = match result {
        Ok(confirmation) => Settlement::Confirmed(confirmation),
        Err(e) => Settlement::Failed {
            reason: e.to_string(),
        },
    };

    Outcome {
        index: operation.index,
        gas: operation.gas,
        value_moved: operation.value_moved,
        started,
        finished,
        submitted_at,
        settled_at,
        settlement,
    }
}
