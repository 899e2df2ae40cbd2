//! Gas pool management.
//!
//! A [`GasPool`] owns the idle gas objects of one account. Objects leave the
//! pool through [`GasPool::take`] and come back only as change extracted from
//! settled outcomes, so an object can never be handed to two operations at
//! once and nothing whose spend is still unknown is reused.

use crate::client::{ClientError, LedgerClient};
use crate::types::{format_coins, Account, GasObject, Outcome, Settlement};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Errors while funding a gas pool.
#[derive(Debug, thiserror::Error)]
pub enum FundingError {
    /// The account cannot cover the fragments plus the funding operation.
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    /// The split succeeded but created fewer fragments than requested.
    #[error("Funding created {created} fragments, expected {requested}")]
    Shortfall { requested: usize, created: usize },

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl FundingError {
    /// Whether the worker must stop rather than retry later.
    pub fn is_fatal(&self) -> bool {
        match self {
            FundingError::InsufficientBalance { .. } | FundingError::Shortfall { .. } => true,
            FundingError::Client(ClientError::InsufficientFunds { .. }) => true,
            FundingError::Client(_) => false,
        }
    }
}

/// What happened to a round's gas objects after settlement.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecycleStats {
    /// Change objects returned to the pool.
    pub recycled: usize,
    /// Change objects dropped because they can no longer pay for an operation.
    pub retired: usize,
    /// Objects with no usable change (failed or fully consumed).
    pub lost: usize,
}

/// Capture the change left by a spend as a new gas object.
///
/// A failed submission yields nothing: the fragment's fate is unknown and it
/// must not be reused without re-querying ownership.
pub fn extract_change(outcome: &Outcome) -> Option<GasObject> {
    let confirmation = match &outcome.settlement {
        Settlement::Confirmed(c) => c,
        Settlement::Failed { .. } => return None,
    };
    let reference = confirmation.gas_change.clone()?;

    let moved = if confirmation.success {
        outcome.value_moved as i128
    } else {
        0
    };
    let value = outcome.gas.value.map(|v| {
        let remaining = v as i128 - confirmation.cost.net() as i128 - moved;
        remaining.clamp(0, u64::MAX as i128) as u64
    });

    Some(GasObject {
        reference,
        owner: outcome.gas.owner.clone(),
        value,
    })
}

/// Idle gas objects for one account.
pub struct GasPool {
    account: Account,
    client: Arc<dyn LedgerClient>,

    /// Objects not currently bound to any operation.
    available: Vec<GasObject>,

    /// Objects whose known value drops below this are retired.
    min_value: u64,

    /// Cost ceiling for the split operation itself.
    funding_budget: u64,
}

impl GasPool {
    /// Create an empty pool.
    pub fn new(
        account: Account,
        client: Arc<dyn LedgerClient>,
        min_value: u64,
        funding_budget: u64,
    ) -> Self {
        Self {
            account,
            client,
            available: Vec::new(),
            min_value,
            funding_budget,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Number of idle objects.
    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    /// Ids of all idle objects.
    pub fn reserved_ids(&self) -> Vec<String> {
        self.available.iter().map(|g| g.id().to_string()).collect()
    }

    /// Split `count` fragments of `fragment_value` off the account's balance.
    ///
    /// Fails with [`FundingError::InsufficientBalance`] before splitting if
    /// the balance outside the pool cannot cover the fragments and the
    /// funding operation's budget, and with [`FundingError::Shortfall`] if fewer
    /// fragments come back than requested. The returned objects are not
    /// added to the pool; see [`GasPool::replenish`].
    pub async fn fund(
        &self,
        count: usize,
        fragment_value: u64,
    ) -> Result<Vec<GasObject>, FundingError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        // Pooled objects are reserved and cannot fund the split.
        let pooled: u64 = self.available.iter().filter_map(|g| g.value).sum();
        let available = self
            .client
            .get_balance(self.account.address())
            .await?
            .saturating_sub(pooled);
        let required = (count as u64)
            .checked_mul(fragment_value)
            .and_then(|total| total.checked_add(self.funding_budget))
            .unwrap_or(u64::MAX);
        if available < required {
            return Err(FundingError::InsufficientBalance {
                required,
                available,
            });
        }

        let amounts = vec![fragment_value; count];
        let receipt = self
            .client
            .split(
                &self.account,
                &self.reserved_ids(),
                &amounts,
                self.funding_budget,
            )
            .await?;

        if receipt.created.len() != count {
            return Err(FundingError::Shortfall {
                requested: count,
                created: receipt.created.len(),
            });
        }

        info!(
            account = %self.account.address().short(),
            fragments = count,
            fragment_value,
            digest = %receipt.digest,
            cost = %format_coins(receipt.cost.net()),
            "Gas objects created"
        );

        Ok(receipt
            .created
            .into_iter()
            .map(|reference| GasObject {
                reference,
                owner: self.account.address().clone(),
                value: Some(fragment_value),
            })
            .collect())
    }

    /// Fund whatever is missing for the pool to hold `target` objects.
    ///
    /// Returns the number of newly funded objects.
    pub async fn replenish(
        &mut self,
        target: usize,
        fragment_value: u64,
    ) -> Result<usize, FundingError> {
        let missing = target.saturating_sub(self.available.len());
        if missing == 0 {
            return Ok(0);
        }
        let created = self.fund(missing, fragment_value).await?;
        self.available.extend(created);
        Ok(missing)
    }

    /// Remove up to `n` objects from the pool, handing ownership to the caller.
    pub fn take(&mut self, n: usize) -> Vec<GasObject> {
        let n = n.min(self.available.len());
        self.available.drain(..n).collect()
    }

    /// Remove every idle object from the pool.
    pub fn take_all(&mut self) -> Vec<GasObject> {
        std::mem::take(&mut self.available)
    }

    /// Return change from settled outcomes to the pool.
    ///
    /// Callers must only pass outcomes of a fully settled round.
    pub fn recycle(&mut self, outcomes: &[Outcome]) -> RecycleStats {
        let mut stats = RecycleStats::default();

        for outcome in outcomes {
            match extract_change(outcome) {
                Some(change) if change.value.is_some_and(|v| v < self.min_value) => {
                    debug!(
                        object = %change.id(),
                        value = ?change.value,
                        min_value = self.min_value,
                        "Retiring depleted gas object"
                    );
                    stats.retired += 1;
                }
                Some(change) => {
                    self.available.push(change);
                    stats.recycled += 1;
                }
                None => stats.lost += 1,
            }
        }

        if stats.lost > 0 {
            warn!(
                account = %self.account.address().short(),
                lost = stats.lost,
                "Gas objects without change this round"
            );
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Confirmation, GasCost, ObjectRef};
    use std::time::{Instant, SystemTime};

    fn gas(value: Option<u64>) -> GasObject {
        GasObject {
            reference: ObjectRef {
                object_id: "0xgas".into(),
                version: 1,
                digest: "d1".into(),
            },
            owner: crate::types::Address::new("0xowner"),
            value,
        }
    }

    fn outcome(settlement: Settlement, value_moved: u64) -> Outcome {
        let now = Instant::now();
        Outcome {
            index: 0,
            gas: gas(Some(10_000_000)),
            value_moved,
            started: now,
            finished: now,
            submitted_at: SystemTime::now(),
            settled_at: SystemTime::now(),
            settlement,
        }
    }

    fn confirmed(success: bool, change: bool) -> Settlement {
        Settlement::Confirmed(Confirmation {
            digest: "tx".into(),
            success,
            error: None,
            cost: GasCost {
                computation: 1_000_000,
                storage: 2_000_000,
                rebate: 1_500_000,
            },
            gas_change: change.then(|| ObjectRef {
                object_id: "0xgas".into(),
                version: 2,
                digest: "d2".into(),
            }),
        })
    }

    #[test]
    fn test_failed_outcome_yields_no_change() {
        let failed = outcome(
            Settlement::Failed {
                reason: "rejected".into(),
            },
            0,
        );
        assert!(extract_change(&failed).is_none());
        assert!(extract_change(&failed).is_none());
    }

    #[test]
    fn test_change_value_subtracts_cost_and_moved_value() {
        let change = extract_change(&outcome(confirmed(true, true), 1)).unwrap();
        assert_eq!(change.reference.version, 2);
        assert_eq!(change.value, Some(10_000_000 - 1_500_000 - 1));
    }

    #[test]
    fn test_execution_failure_still_returns_change_without_moved_value() {
        let change = extract_change(&outcome(confirmed(false, true), 1)).unwrap();
        assert_eq!(change.value, Some(10_000_000 - 1_500_000));
    }

    #[test]
    fn test_consumed_gas_object_yields_no_change() {
        assert!(extract_change(&outcome(confirmed(true, false), 0)).is_none());
    }

    mod funding {
        use super::super::*;
        use crate::testing::MockLedger;
        use crate::types::GasCost;
        use crate::workloads::{OperationSpec, Payload};
        use tokio_test::{assert_err, assert_ok};

        const FRAGMENT: u64 = 10_000_000;

        fn pool(ledger: &Arc<MockLedger>, balance: u64) -> GasPool {
            let account = ledger.funded_account(1, balance);
            GasPool::new(account, ledger.clone(), FRAGMENT, 10_000_000)
        }

        #[tokio::test]
        async fn test_fund_returns_requested_fragments() {
            let ledger = Arc::new(MockLedger::new());
            let pool = pool(&ledger, 100_000_000);
            let owner = pool.account().address().clone();

            let created = assert_ok!(pool.fund(5, FRAGMENT).await);

            assert_eq!(created.len(), 5);
            assert!(created.iter().all(|g| g.value == Some(FRAGMENT)));
            let mut ids: Vec<&str> = created.iter().map(|g| g.id()).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), 5);

            // Spendable value outside the fragments dropped by N*v plus the split cost.
            let outside = ledger.balance(&owner) - 5 * FRAGMENT;
            assert_eq!(
                100_000_000 - outside,
                5 * FRAGMENT + ledger.split_cost().net() as u64
            );
        }

        #[tokio::test]
        async fn test_insufficient_balance_checked_before_split() {
            let ledger = Arc::new(MockLedger::new());
            let pool = pool(&ledger, 50_000_000);

            let err = assert_err!(pool.fund(5, FRAGMENT).await);

            assert!(matches!(
                err,
                FundingError::InsufficientBalance {
                    required: 60_000_000,
                    available: 50_000_000
                }
            ));
            assert!(err.is_fatal());
            assert_eq!(ledger.splits(), 0);
        }

        #[tokio::test]
        async fn test_replenish_keeps_pooled_objects() {
            let ledger = Arc::new(MockLedger::new());
            let mut pool = pool(&ledger, 1_000_000_000);

            assert_eq!(assert_ok!(pool.replenish(3, FRAGMENT).await), 3);
            let kept = pool.take(1);
            assert_eq!(pool.len(), 2);

            assert_eq!(assert_ok!(pool.replenish(3, FRAGMENT).await), 1);
            assert_eq!(pool.len(), 3);
            assert_eq!(assert_ok!(pool.replenish(3, FRAGMENT).await), 0);

            // The pooled objects were not merged into the second split.
            assert_eq!(ledger.splits(), 2);
            assert!(!pool.reserved_ids().contains(&kept[0].id().to_string()));
            let spec = OperationSpec::new(Payload::default(), 1_000_000, 1_000);
            for gas in pool.take_all() {
                assert_ok!(ledger.build_transaction(pool.account(), &gas, &spec).await);
            }
        }

        #[tokio::test]
        async fn test_pooled_objects_do_not_count_toward_funding() {
            let split_cost = GasCost {
                computation: 1_000_000,
                storage: 2_000_000,
                rebate: 0,
            };
            let ledger = Arc::new(MockLedger::new().with_split_cost(split_cost));
            let mut pool = pool(&ledger, 45_000_000);
            let owner = pool.account().address().clone();

            assert_eq!(assert_ok!(pool.replenish(3, FRAGMENT).await), 3);
            assert_eq!(ledger.coin_count(&owner), 4);
            assert_eq!(ledger.balance(&owner), 42_000_000);

            let err = assert_err!(pool.fund(1, FRAGMENT).await);

            assert!(matches!(
                err,
                FundingError::InsufficientBalance {
                    required: 20_000_000,
                    available: 12_000_000
                }
            ));
            assert_eq!(ledger.splits(), 1);
            assert_eq!(pool.len(), 3);
        }

        #[tokio::test]
        async fn test_oversized_request_is_insufficient_balance() {
            let ledger = Arc::new(MockLedger::new());
            let pool = pool(&ledger, 100);

            let err = assert_err!(pool.fund(2, u64::MAX).await);

            assert!(matches!(
                err,
                FundingError::InsufficientBalance {
                    required: u64::MAX,
                    available: 100
                }
            ));
            assert_eq!(ledger.splits(), 0);
        }

        #[test]
        fn test_take_never_exceeds_pool() {
            let ledger = Arc::new(MockLedger::new());
            let mut pool = pool(&ledger, 0);
            pool.available = ledger.mint_gas(pool.account(), 2, FRAGMENT);

            assert_eq!(pool.take(5).len(), 2);
            assert!(pool.is_empty());
            assert!(pool.take_all().is_empty());
        }
    }

    #[test]
    fn test_fatal_funding_errors() {
        assert!(FundingError::InsufficientBalance {
            required: 2,
            available: 1
        }
        .is_fatal());
        assert!(FundingError::Shortfall {
            requested: 5,
            created: 4
        }
        .is_fatal());
        assert!(!FundingError::Client(ClientError::Transport("reset".into())).is_fatal());
    }
}
