//! Worker loop and run orchestration.
//!
//! One [`Worker`] per account/endpoint pair. Each worker owns its gas pool,
//! its reporter and its client; workers share nothing but the start barrier.
//!
//! A worker's life:
//!
//! 1. Pre-flight: fund the pool to the round width and build the first round.
//! 2. Arrive at the barrier and wait for every other worker.
//! 3. Loop in closed-loop or open-loop mode until a fatal error, or until the
//!    configured number of rounds has run.

use crate::client::{JsonRpcClient, LedgerClient};
use crate::config::{ConfigError, SpammerConfig};
use crate::coordinator::{barrier, StartTicket};
use crate::error::SpammerError;
use crate::gas::GasPool;
use crate::metrics::{LifetimeTotals, MetricsFile, RoundReporter, WorkerLabels};
use crate::scheduler::{build_round, fire_round, BuiltRound, SubmissionMode};
use crate::types::{format_coins, Account, Endpoint};
use crate::workloads::OperationSpec;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Per-worker settings shared by every worker in a run.
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub spec: OperationSpec,
    pub mode: SubmissionMode,
    /// Operations per round.
    pub width: usize,
    pub fragment_value: u64,
    pub funding_budget: u64,
    pub interval: Duration,
    pub rounds: Option<u64>,
    pub metrics_file: Option<MetricsFile>,
}

impl WorkerSettings {
    pub fn from_config(config: &SpammerConfig) -> Self {
        Self {
            spec: config.operation_spec(),
            mode: config.mode,
            width: config.tps,
            fragment_value: config.fragment_value(),
            funding_budget: config.funding_gas_budget,
            interval: config.round_interval(),
            rounds: config.rounds,
            metrics_file: config.metrics_file.clone().map(MetricsFile::new),
        }
    }
}

/// Load-generation loop for one account against one endpoint.
pub struct Worker {
    id: usize,
    endpoint: Endpoint,
    client: Arc<dyn LedgerClient>,
    pool: GasPool,
    settings: WorkerSettings,
    reporter: RoundReporter,
}

impl Worker {
    pub fn new(
        id: usize,
        account: Account,
        endpoint: Endpoint,
        client: Arc<dyn LedgerClient>,
        settings: WorkerSettings,
    ) -> Self {
        let labels = WorkerLabels {
            worker: id.to_string(),
            account: account.address().to_string(),
            endpoint: endpoint.to_string(),
            mode: settings.mode.to_string(),
        };
        let reporter =
            RoundReporter::new(labels, settings.width, settings.metrics_file.clone());
        let pool = GasPool::new(
            account,
            client.clone(),
            settings.spec.min_fragment_value(),
            settings.funding_budget,
        );

        Self {
            id,
            endpoint,
            client,
            pool,
            settings,
            reporter,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run pre-flight, wait at the barrier, then loop.
    ///
    /// Returns the lifetime totals when a round limit is configured and
    /// reached. Any error returned is fatal for this worker.
    pub async fn run(mut self, ticket: StartTicket) -> Result<LifetimeTotals, SpammerError> {
        info!(
            worker = self.id,
            account = %self.pool.account().address(),
            endpoint = %self.endpoint,
            mode = %self.settings.mode,
            width = self.settings.width,
            payload = self.settings.spec.payload.name(),
            "Worker starting pre-flight"
        );

        let first = match self.preflight().await {
            Ok(round) => round,
            Err(e) => {
                error!(worker = self.id, error = %e, "Pre-flight failed");
                ticket.abort(e.to_string());
                return Err(e);
            }
        };

        ticket.ready().await?;
        info!(
            worker = self.id,
            prepared = first.len(),
            "Start signal received"
        );

        match self.settings.mode {
            SubmissionMode::Closed => self.run_closed(first).await,
            SubmissionMode::Open => self.run_open(first).await,
        }
    }

    /// Fire, aggregate, sleep, refill, repeat.
    async fn run_closed(&mut self, first: BuiltRound) -> Result<LifetimeTotals, SpammerError> {
        let mut round = first;
        loop {
            let all_failed = self.settle(round).await;
            if self.finished() {
                return Ok(self.reporter.totals().clone());
            }
            if all_failed {
                warn!(
                    worker = self.id,
                    backoff = ?self.settings.interval,
                    "Round produced no confirmations, backing off"
                );
            }

            tokio::time::sleep(self.settings.interval).await;
            round = self.next_round().await;
        }
    }

    /// Chain rounds on change until none is left, then start a new episode.
    async fn run_open(&mut self, first: BuiltRound) -> Result<LifetimeTotals, SpammerError> {
        let mut round = first;
        loop {
            let mut depth = 0usize;
            while !round.is_empty() {
                depth += 1;
                let all_failed = self.settle(round).await;
                if self.finished() {
                    return Ok(self.reporter.totals().clone());
                }
                if all_failed {
                    warn!(
                        worker = self.id,
                        depth,
                        "Round produced no confirmations, ending chain"
                    );
                    break;
                }

                let change = self.pool.take_all();
                round = build_round(
                    self.client.as_ref(),
                    self.pool.account(),
                    change,
                    &self.settings.spec,
                )
                .await;
            }

            info!(
                worker = self.id,
                depth,
                next_episode_in = ?self.settings.interval,
                "Open-loop chain ended"
            );
            if self.finished() {
                return Ok(self.reporter.totals().clone());
            }

            tokio::time::sleep(self.settings.interval).await;
            round = self.next_round().await;
        }
    }

    /// Submit a round, report it and recycle its change.
    ///
    /// Returns whether the round had no confirmations.
    async fn settle(&mut self, round: BuiltRound) -> bool {
        let outcomes =
            fire_round(self.client.as_ref(), self.pool.account(), round.operations).await;
        let sample = self.reporter.report(&outcomes).await;
        let stats = self.pool.recycle(&outcomes);
        debug!(
            worker = self.id,
            recycled = stats.recycled,
            retired = stats.retired,
            lost = stats.lost,
            pooled = self.pool.len(),
            "Round settled"
        );
        sample.all_failed()
    }

    /// Top the pool up to the round width and build a round from it.
    ///
    /// Funding failures after the start never end the worker: they are
    /// logged and the round proceeds with whatever is pooled. A shortfall
    /// that persists shows up as empty or all-failed rounds.
    async fn next_round(&mut self) -> BuiltRound {
        match self
            .pool
            .replenish(self.settings.width, self.settings.fragment_value)
            .await
        {
            Ok(0) => {}
            Ok(funded) => debug!(worker = self.id, funded, "Pool topped up"),
            Err(e) => warn!(
                worker = self.id,
                error = %e,
                pooled = self.pool.len(),
                "Funding failed, continuing with pooled gas objects"
            ),
        }

        self.build_from_pool().await
    }

    /// Fund the full round width and build the first round. Any funding
    /// failure here is returned, so the barrier is never passed short.
    async fn preflight(&mut self) -> Result<BuiltRound, SpammerError> {
        self.pool
            .replenish(self.settings.width, self.settings.fragment_value)
            .await?;
        Ok(self.build_from_pool().await)
    }

    async fn build_from_pool(&mut self) -> BuiltRound {
        let gas = self.pool.take(self.settings.width);
        build_round(
            self.client.as_ref(),
            self.pool.account(),
            gas,
            &self.settings.spec,
        )
        .await
    }

    fn finished(&self) -> bool {
        self.settings
            .rounds
            .is_some_and(|limit| self.reporter.totals().rounds >= limit)
    }
}

/// All workers of one run.
pub struct Spammer {
    workers: Vec<Worker>,
}

impl Spammer {
    /// Validate the configuration and connect one JSON-RPC client per worker.
    pub fn new(config: SpammerConfig) -> Result<Self, SpammerError> {
        let pairs = config.resolve_workers()?;
        let clients = pairs
            .iter()
            .map(|(_, endpoint)| {
                JsonRpcClient::new(endpoint.clone())
                    .map(|client| Arc::new(client) as Arc<dyn LedgerClient>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::assemble(&config, pairs, clients)
    }

    /// Validate the configuration and use the given clients, one per worker
    /// in credential order.
    pub fn with_clients(
        config: SpammerConfig,
        clients: Vec<Arc<dyn LedgerClient>>,
    ) -> Result<Self, SpammerError> {
        let pairs = config.resolve_workers()?;
        Self::assemble(&config, pairs, clients)
    }

    fn assemble(
        config: &SpammerConfig,
        pairs: Vec<(Account, Endpoint)>,
        clients: Vec<Arc<dyn LedgerClient>>,
    ) -> Result<Self, SpammerError> {
        if clients.len() != pairs.len() {
            return Err(ConfigError::WorkerCount {
                expected: pairs.len(),
                accounts: clients.len(),
            }
            .into());
        }

        let settings = WorkerSettings::from_config(config);
        let workers = pairs
            .into_iter()
            .zip(clients)
            .enumerate()
            .map(|(id, ((account, endpoint), client))| {
                Worker::new(id, account, endpoint, client, settings.clone())
            })
            .collect();

        Ok(Self { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Run every worker behind a shared start barrier.
    ///
    /// The first fatal worker error stops the whole run. When every worker
    /// reaches its round limit, their lifetime totals are returned in worker
    /// order.
    pub async fn run(self) -> Result<Vec<LifetimeTotals>, SpammerError> {
        let (signal, tickets) = barrier(self.workers.len())?;
        let count = self.workers.len();

        let mut tasks = JoinSet::new();
        for (worker, ticket) in self.workers.into_iter().zip(tickets) {
            let id = worker.id();
            tasks.spawn(async move { (id, worker.run(ticket).await) });
        }

        tokio::spawn(async move {
            if signal.wait().await.is_ok() {
                info!(workers = signal.workers(), "Load generation started");
            }
        });

        let mut totals: Vec<Option<LifetimeTotals>> = vec![None; count];
        let mut failure: Option<SpammerError> = None;

        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok((id, Ok(worker_totals))) => {
                    info!(
                        worker = id,
                        rounds = worker_totals.rounds,
                        confirmed = worker_totals.confirmed,
                        failed = worker_totals.failed,
                        fees = %format_coins(worker_totals.total_cost),
                        tps = format!("{:.2}", worker_totals.average_throughput()),
                        "Worker finished"
                    );
                    totals[id] = Some(worker_totals);
                    continue;
                }
                Ok((id, Err(e))) => {
                    error!(worker = id, error = %e, "Worker stopped");
                    e
                }
                Err(e) if e.is_cancelled() => continue,
                Err(e) => SpammerError::WorkerTerminated {
                    worker: usize::MAX,
                    reason: e.to_string(),
                },
            };

            // Barrier aborts are a consequence; keep the worker error that caused them.
            let replace = match &failure {
                None => true,
                Some(SpammerError::Coordinator(_)) => {
                    !matches!(error, SpammerError::Coordinator(_))
                }
                Some(_) => false,
            };
            if replace {
                failure = Some(error);
            }
            tasks.abort_all();
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(totals.into_iter().flatten().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivateKey;
    use crate::gas::FundingError;
    use crate::testing::MockLedger;

    const BALANCE: u64 = 1_000_000_000;

    fn key(seed: u8) -> PrivateKey {
        PrivateKey::new(hex::encode([seed; 32]))
    }

    fn config(seeds: &[u8]) -> SpammerConfig {
        SpammerConfig::new(seeds.iter().map(|&s| key(s)).collect())
            .with_tps(3)
            .with_interval(Duration::from_secs(1))
    }

    #[test]
    fn test_client_count_must_match_accounts() {
        let ledger: Arc<dyn LedgerClient> = Arc::new(MockLedger::new());
        let result = Spammer::with_clients(config(&[1, 2]), vec![ledger]);
        assert!(matches!(
            result,
            Err(SpammerError::Config(ConfigError::WorkerCount { .. }))
        ));
    }

    #[test]
    fn test_invalid_config_rejected_before_start() {
        let result = Spammer::with_clients(SpammerConfig::default(), Vec::new());
        assert!(matches!(
            result,
            Err(SpammerError::Config(ConfigError::NoAccounts))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_loop_runs_configured_rounds() {
        let ledger = Arc::new(MockLedger::new());
        let account = ledger.funded_account(1, BALANCE);

        let clients: Vec<Arc<dyn LedgerClient>> = vec![ledger.clone()];
        let spammer = Spammer::with_clients(config(&[1]).with_rounds(3), clients).unwrap();
        let totals = spammer.run().await.unwrap();

        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].rounds, 3);
        assert_eq!(totals[0].confirmed, 9);
        assert_eq!(totals[0].failed, 0);
        assert_eq!(ledger.submission_times().len(), 9);
        assert!(ledger.balance(account.address()) < BALANCE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_loop_chains_on_change() {
        let ledger = Arc::new(MockLedger::new());
        ledger.funded_account(1, BALANCE);

        // Enough value in each fragment for several spends.
        let config = config(&[1])
            .with_mode(SubmissionMode::Open)
            .with_fragment_value(50_000_000)
            .with_rounds(4);
        let clients: Vec<Arc<dyn LedgerClient>> = vec![ledger.clone()];
        let spammer = Spammer::with_clients(config, clients).unwrap();
        let totals = spammer.run().await.unwrap();

        assert_eq!(totals[0].rounds, 4);
        assert_eq!(totals[0].confirmed, 12);
        // One split funded every round of the chain.
        assert_eq!(ledger.splits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_loop_tops_up_lost_fragments() {
        let ledger = Arc::new(MockLedger::new());
        ledger.funded_account(1, BALANCE);
        // Object ids are sequential: the funded coin, the split remainder,
        // then the three fragments.
        ledger.reject_submissions_for(&format!("0x{:064x}", 4));

        let config = config(&[1]).with_fragment_value(50_000_000).with_rounds(2);
        let clients: Vec<Arc<dyn LedgerClient>> = vec![ledger.clone()];
        let totals = Spammer::with_clients(config, clients)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(totals[0].confirmed, 2 + 3);
        assert_eq!(totals[0].failed, 1);
        // The second round reused two change objects and funded one.
        assert_eq!(ledger.splits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_top_up_continues_on_pooled_change() {
        let ledger = Arc::new(MockLedger::new());
        // Exactly three 50M fragments plus the funding budget.
        let account = ledger.funded_account(1, 160_000_000);
        ledger.reject_submissions_for(&format!("0x{:064x}", 4));

        let config = config(&[1]).with_fragment_value(50_000_000).with_rounds(3);
        let clients: Vec<Arc<dyn LedgerClient>> = vec![ledger.clone()];
        let totals = Spammer::with_clients(config, clients)
            .unwrap()
            .run()
            .await
            .unwrap();

        // Every top-up after the first round is unaffordable; the worker
        // keeps running on the two change objects.
        assert_eq!(totals[0].rounds, 3);
        assert_eq!(totals[0].confirmed, 2 + 2 + 2);
        assert_eq!(totals[0].failed, 1);
        assert_eq!(ledger.splits(), 1);
        assert_eq!(ledger.submission_times().len(), 7);
        assert!(ledger.balance(account.address()) > 0);
    }

    #[tokio::test]
    async fn test_no_submission_before_release() {
        let ledger = Arc::new(MockLedger::new().with_latency(Duration::from_millis(5)));
        let config = config(&[1, 2, 3]).with_rounds(1);
        let settings = WorkerSettings::from_config(&config);
        let (signal, tickets) = barrier(3).unwrap();

        let mut handles = Vec::new();
        for (((account, endpoint), ticket), seed) in config
            .resolve_workers()
            .unwrap()
            .into_iter()
            .zip(tickets)
            .zip([1u8, 2, 3])
        {
            ledger.funded_account(seed, BALANCE);
            let worker = Worker::new(
                ticket.worker(),
                account,
                endpoint,
                ledger.clone(),
                settings.clone(),
            );
            handles.push(tokio::spawn(worker.run(ticket)));
        }

        let released = signal.wait().await.unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let submissions = ledger.submission_times();
        assert_eq!(submissions.len(), 9);
        assert!(submissions.iter().all(|&at| at >= released));
    }

    #[tokio::test]
    async fn test_insufficient_balance_aborts_every_worker() {
        let ledger = Arc::new(MockLedger::new());
        ledger.funded_account(1, BALANCE);
        ledger.funded_account(2, 1_000);

        let clients: Vec<Arc<dyn LedgerClient>> = vec![ledger.clone(), ledger.clone()];
        let err = Spammer::with_clients(config(&[1, 2]), clients)
            .unwrap()
            .run()
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(
            err,
            SpammerError::Funding(FundingError::InsufficientBalance { .. })
        ));
        assert!(ledger.submission_times().is_empty());
    }
}
