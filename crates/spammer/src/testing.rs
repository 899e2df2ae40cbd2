//! In-memory ledger for tests.
//!
//! [`MockLedger`] models coin objects with owners, values and versions. It
//! rejects any attempt to spend an object at a stale version, which makes
//! double spends visible to tests, and lets tests script build failures,
//! rejections and failed executions per object.

use crate::client::{ClientError, LedgerClient, SplitReceipt};
use crate::keys::AccountKey;
use crate::types::{
    Account, Address, Confirmation, GasCost, GasObject, ObjectRef, PreparedOperation,
};
use crate::workloads::OperationSpec;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Coin {
    owner: Address,
    value: u64,
    version: u64,
}

#[derive(Default)]
struct State {
    coins: BTreeMap<String, Coin>,
    next_object: u64,
    next_digest: u64,
    build_failures: HashSet<String>,
    rejections: HashSet<String>,
    execution_failures: HashSet<String>,
    submissions: Vec<Instant>,
    splits: usize,
}

impl State {
    fn new_object_id(&mut self) -> String {
        self.next_object += 1;
        format!("0x{:064x}", self.next_object)
    }

    fn new_digest(&mut self) -> String {
        self.next_digest += 1;
        format!("digest-{}", self.next_digest)
    }

    fn object_ref(id: &str, coin: &Coin) -> ObjectRef {
        ObjectRef {
            object_id: id.to_string(),
            version: coin.version,
            digest: format!("{id}@{}", coin.version),
        }
    }

    fn mint(&mut self, owner: &Address, value: u64) -> ObjectRef {
        let id = self.new_object_id();
        let coin = Coin {
            owner: owner.clone(),
            value,
            version: 1,
        };
        let reference = Self::object_ref(&id, &coin);
        self.coins.insert(id, coin);
        reference
    }

    fn balance(&self, owner: &Address) -> u64 {
        self.coins
            .values()
            .filter(|c| &c.owner == owner)
            .map(|c| c.value)
            .sum()
    }
}

/// In-memory implementation of [`LedgerClient`]. The reference gas price
/// defaults to 1,000.
pub struct MockLedger {
    state: Mutex<State>,
    split_cost: GasCost,
    operation_cost: GasCost,
    reference_gas_price: u64,
    latency: Duration,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    /// Create an empty ledger with default costs and no latency.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            split_cost: GasCost {
                computation: 1_000_000,
                storage: 5_000_000,
                rebate: 1_000_000,
            },
            operation_cost: GasCost {
                computation: 750_000,
                storage: 1_976_000,
                rebate: 978_120,
            },
            reference_gas_price: 1_000,
            latency: Duration::ZERO,
        }
    }

    /// Charge `cost` for every benchmark operation.
    pub fn with_operation_cost(mut self, cost: GasCost) -> Self {
        self.operation_cost = cost;
        self
    }

    /// Charge `cost` for every split.
    pub fn with_split_cost(mut self, cost: GasCost) -> Self {
        self.split_cost = cost;
        self
    }

    /// Refuse to build operations priced below `price`.
    pub fn with_reference_gas_price(mut self, price: u64) -> Self {
        self.reference_gas_price = price;
        self
    }

    /// Delay every submission by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn operation_cost(&self) -> GasCost {
        self.operation_cost
    }

    pub fn split_cost(&self) -> GasCost {
        self.split_cost
    }

    /// Create an account from a one-byte seed holding a single coin of `balance`.
    pub fn funded_account(&self, seed: u8, balance: u64) -> Account {
        let account = Account::new(AccountKey::from_seed(&[seed; 32]));
        self.state.lock().mint(account.address(), balance);
        account
    }

    /// Mint `count` coins of `value` directly to `account` and return them as gas objects.
    pub fn mint_gas(&self, account: &Account, count: usize, value: u64) -> Vec<GasObject> {
        let mut state = self.state.lock();
        (0..count)
            .map(|_| GasObject {
                reference: state.mint(account.address(), value),
                owner: account.address().clone(),
                value: Some(value),
            })
            .collect()
    }

    /// Make encoding fail for this object.
    pub fn fail_builds_for(&self, object_id: &str) {
        self.state.lock().build_failures.insert(object_id.to_string());
    }

    /// Reject submissions paid by this object.
    pub fn reject_submissions_for(&self, object_id: &str) {
        self.state.lock().rejections.insert(object_id.to_string());
    }

    /// Execute operations paid by this object with a failed status.
    pub fn fail_execution_for(&self, object_id: &str) {
        self.state
            .lock()
            .execution_failures
            .insert(object_id.to_string());
    }

    /// Current total value owned by `owner`.
    pub fn balance(&self, owner: &Address) -> u64 {
        self.state.lock().balance(owner)
    }

    /// Number of coins owned by `owner`.
    pub fn coin_count(&self, owner: &Address) -> usize {
        self.state
            .lock()
            .coins
            .values()
            .filter(|c| &c.owner == owner)
            .count()
    }

    /// When each submission reached the ledger.
    pub fn submission_times(&self) -> Vec<Instant> {
        self.state.lock().submissions.clone()
    }

    /// Number of split operations executed.
    pub fn splits(&self) -> usize {
        self.state.lock().splits
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_balance(&self, owner: &Address) -> Result<u64, ClientError> {
        Ok(self.balance(owner))
    }

    async fn split(
        &self,
        account: &Account,
        reserved: &[String],
        amounts: &[u64],
        gas_budget: u64,
    ) -> Result<SplitReceipt, ClientError> {
        let mut state = self.state.lock();
        let owner = account.address();

        let sources: Vec<String> = state
            .coins
            .iter()
            .filter(|(id, c)| &c.owner == owner && !reserved.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        let available: u64 = sources.iter().map(|id| state.coins[id].value).sum();
        let split_total: u64 = amounts.iter().sum();
        let required = split_total + gas_budget;
        if available < required {
            return Err(ClientError::InsufficientFunds {
                required,
                available,
            });
        }

        for id in &sources {
            state.coins.remove(id);
        }
        let remainder = available as i64 - split_total as i64 - self.split_cost.net();
        state.mint(owner, remainder.max(0) as u64);

        let created = amounts
            .iter()
            .map(|&amount| state.mint(owner, amount))
            .collect();
        state.splits += 1;

        Ok(SplitReceipt {
            digest: state.new_digest(),
            cost: self.split_cost,
            created,
        })
    }

    async fn build_transaction(
        &self,
        account: &Account,
        gas: &GasObject,
        spec: &OperationSpec,
    ) -> Result<Vec<u8>, ClientError> {
        if spec.gas_price < self.reference_gas_price {
            return Err(ClientError::GasPriceTooLow {
                configured: spec.gas_price,
                reference: self.reference_gas_price,
            });
        }

        let state = self.state.lock();
        if state.build_failures.contains(gas.id()) {
            return Err(ClientError::ObjectUnavailable(gas.id().to_string()));
        }
        let coin = state
            .coins
            .get(gas.id())
            .filter(|c| &c.owner == account.address() && c.version == gas.reference.version)
            .ok_or_else(|| ClientError::ObjectUnavailable(gas.id().to_string()))?;

        let required = spec.min_fragment_value();
        if coin.value < required {
            return Err(ClientError::InsufficientFunds {
                required,
                available: coin.value,
            });
        }

        Ok(format!("{}:{}", gas.id(), gas.reference.version).into_bytes())
    }

    async fn submit(
        &self,
        account: &Account,
        operation: &PreparedOperation,
    ) -> Result<Confirmation, ClientError> {
        self.state.lock().submissions.push(Instant::now());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock();
        let id = operation.gas.id().to_string();

        if state.rejections.contains(&id) {
            return Err(ClientError::Rpc {
                code: -32002,
                message: format!("Transaction paid by {id} rejected"),
            });
        }

        let expected = format!("{}:{}", id, operation.gas.reference.version);
        if operation.tx_bytes != expected.as_bytes() {
            return Err(ClientError::ObjectUnavailable(id));
        }

        let failed = state.execution_failures.contains(&id);
        let cost = self.operation_cost;
        let moved = if failed { 0 } else { operation.value_moved };

        let version = operation.gas.reference.version;
        let Some(coin) = state
            .coins
            .get_mut(&id)
            .filter(|c| &c.owner == account.address() && c.version == version)
        else {
            return Err(ClientError::ObjectUnavailable(id));
        };
        let remaining = coin.value as i64 - cost.net() - moved as i64;
        coin.value = remaining.max(0) as u64;
        coin.version += 1;
        let change = State::object_ref(&id, coin);

        if moved > 0 {
            state.mint(account.address(), moved);
        }

        Ok(Confirmation {
            digest: state.new_digest(),
            success: !failed,
            error: failed.then(|| "MoveAbort".to_string()),
            cost,
            gas_change: Some(change),
        })
    }
}
