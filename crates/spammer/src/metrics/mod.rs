//! Round aggregation and reporting.
//!
//! [`aggregate`] turns the settled outcomes of one round into a
//! [`MetricsSample`]. It is order-independent and never fails: a round with
//! no confirmed outcomes yields a zero-throughput sample for which
//! [`MetricsSample::all_failed`] is true, telling the caller to back off.
//!
//! Reported throughput is the observed rate,
//! `confirmed / (max(finished) - min(started))` over confirmed outcomes.
//! The configured (nominal) rate is logged alongside it for comparison.

mod sink;

pub use sink::{metric_line, MetricsFile};

use crate::types::{format_coins, Outcome, Settlement};
use hdrhistogram::Histogram;
use std::time::{Duration, Instant, SystemTime};
use tracing::{info, warn};

/// Floor for the time delta when computing throughput, so a round whose
/// outcomes share a single timestamp still produces a finite rate.
const MIN_TIME_DELTA: Duration = Duration::from_millis(1);

/// Metrics derived from one settled round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSample {
    pub submitted: usize,
    pub confirmed: usize,
    /// Outcomes that failed to submit or executed with a failure status.
    pub failed: usize,
    /// Earliest start to latest finish across confirmed outcomes.
    pub time_delta: Duration,
    /// Confirmed operations per second over `time_delta`.
    pub throughput: f64,
    pub avg_latency: Duration,
    pub p50_latency: Duration,
    pub p99_latency: Duration,
    pub max_latency: Duration,
    /// Sum of `computation + storage - rebate` over confirmed outcomes,
    /// in smallest units.
    pub total_cost: i64,
}

impl MetricsSample {
    /// No operation in the round was confirmed.
    pub fn all_failed(&self) -> bool {
        self.confirmed == 0
    }
}

/// Compute round metrics from settled outcomes.
pub fn aggregate(outcomes: &[Outcome]) -> MetricsSample {
    let confirmed: Vec<&Outcome> = outcomes.iter().filter(|o| o.is_success()).collect();

    let mut sample = MetricsSample {
        submitted: outcomes.len(),
        confirmed: confirmed.len(),
        failed: outcomes.len() - confirmed.len(),
        ..Default::default()
    };

    let (Some(first_start), Some(last_finish)) = (
        confirmed.iter().map(|o| o.started).min(),
        confirmed.iter().map(|o| o.finished).max(),
    ) else {
        return sample;
    };

    sample.time_delta = last_finish.saturating_duration_since(first_start);
    sample.throughput =
        confirmed.len() as f64 / sample.time_delta.max(MIN_TIME_DELTA).as_secs_f64();

    let total_latency: Duration = confirmed.iter().map(|o| o.latency()).sum();
    sample.avg_latency = total_latency / confirmed.len() as u32;

    if let Ok(mut histogram) = Histogram::<u64>::new(3) {
        for outcome in &confirmed {
            histogram.saturating_record(outcome.latency().as_micros() as u64);
        }
        sample.p50_latency = Duration::from_micros(histogram.value_at_quantile(0.50));
        sample.p99_latency = Duration::from_micros(histogram.value_at_quantile(0.99));
        sample.max_latency = Duration::from_micros(histogram.max());
    }

    sample.total_cost = confirmed
        .iter()
        .filter_map(|o| o.confirmed())
        .map(|c| c.cost.net())
        .sum();

    sample
}

/// Running totals for one worker over the process lifetime.
///
/// Owned by the worker and passed explicitly into each round's reporting
/// step. Retention is the lifetime of the process unless [`reset`] is called.
///
/// [`reset`]: LifetimeTotals::reset
#[derive(Clone, Debug)]
pub struct LifetimeTotals {
    pub rounds: u64,
    pub all_failed_rounds: u64,
    pub submitted: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub total_cost: i64,
    started: Instant,
}

impl Default for LifetimeTotals {
    fn default() -> Self {
        Self::new()
    }
}

impl LifetimeTotals {
    pub fn new() -> Self {
        Self {
            rounds: 0,
            all_failed_rounds: 0,
            submitted: 0,
            confirmed: 0,
            failed: 0,
            total_cost: 0,
            started: Instant::now(),
        }
    }

    /// Fold one round into the totals.
    pub fn record(&mut self, sample: &MetricsSample) {
        self.rounds += 1;
        if sample.all_failed() {
            self.all_failed_rounds += 1;
        }
        self.submitted += sample.submitted as u64;
        self.confirmed += sample.confirmed as u64;
        self.failed += sample.failed as u64;
        self.total_cost += sample.total_cost;
    }

    /// Confirmed operations per second since the totals were started or reset.
    pub fn average_throughput(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.confirmed as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Labels identifying the reporting worker.
#[derive(Clone, Debug, Default)]
pub struct WorkerLabels {
    pub worker: String,
    pub account: String,
    pub endpoint: String,
    pub mode: String,
}

impl WorkerLabels {
    fn pairs(&self) -> [(&str, &str); 4] {
        [
            ("worker", &self.worker),
            ("account", &self.account),
            ("endpoint", &self.endpoint),
            ("mode", &self.mode),
        ]
    }
}

/// Per-worker result aggregator: logs outcomes, derives the round sample,
/// updates lifetime totals and pushes metric lines.
pub struct RoundReporter {
    labels: WorkerLabels,
    nominal_tps: usize,
    totals: LifetimeTotals,
    sink: Option<MetricsFile>,
}

impl RoundReporter {
    pub fn new(labels: WorkerLabels, nominal_tps: usize, sink: Option<MetricsFile>) -> Self {
        Self {
            labels,
            nominal_tps,
            totals: LifetimeTotals::new(),
            sink,
        }
    }

    pub fn totals(&self) -> &LifetimeTotals {
        &self.totals
    }

    /// Report one settled round.
    pub async fn report(&mut self, outcomes: &[Outcome]) -> MetricsSample {
        for outcome in outcomes {
            self.log_outcome(outcome);
        }

        let sample = aggregate(outcomes);
        self.totals.record(&sample);

        if sample.all_failed() {
            warn!(
                worker = %self.labels.worker,
                submitted = sample.submitted,
                "No transactions were confirmed this round"
            );
        } else {
            info!(
                worker = %self.labels.worker,
                confirmed = sample.confirmed,
                failed = sample.failed,
                time_delta_ms = sample.time_delta.as_millis() as u64,
                tps = format!("{:.2}", sample.throughput),
                nominal_tps = self.nominal_tps,
                avg_latency_ms = sample.avg_latency.as_millis() as u64,
                p50_latency_ms = sample.p50_latency.as_millis() as u64,
                p99_latency_ms = sample.p99_latency.as_millis() as u64,
                round_fees = %format_coins(sample.total_cost),
                total_fees = %format_coins(self.totals.total_cost),
                total_confirmed = self.totals.confirmed,
                "Round complete"
            );
        }

        self.push(&sample).await;
        sample
    }

    fn log_outcome(&self, outcome: &Outcome) {
        let index = outcome.index + 1;
        let submitted_at = format_time(outcome.submitted_at);
        match &outcome.settlement {
            Settlement::Confirmed(c) if c.success => info!(
                worker = %self.labels.worker,
                index,
                %submitted_at,
                confirmed_at = %format_time(outcome.settled_at),
                success = true,
                digest = %c.digest,
                "Transaction confirmed"
            ),
            Settlement::Confirmed(c) => warn!(
                worker = %self.labels.worker,
                index,
                %submitted_at,
                confirmed_at = %format_time(outcome.settled_at),
                success = false,
                digest = %c.digest,
                error = c.error.as_deref().unwrap_or("unknown"),
                "Transaction executed with failure status"
            ),
            Settlement::Failed { reason } => warn!(
                worker = %self.labels.worker,
                index,
                %submitted_at,
                success = false,
                %reason,
                "Transaction failed"
            ),
        }
    }

    async fn push(&self, sample: &MetricsSample) {
        let Some(sink) = &self.sink else {
            return;
        };
        let labels = self.labels.pairs();

        let lines = [
            metric_line("spammer_round_tps", &labels, sample.throughput),
            metric_line(
                "spammer_round_time_delta_ms",
                &labels,
                sample.time_delta.as_millis(),
            ),
            metric_line(
                "spammer_round_avg_latency_ms",
                &labels,
                sample.avg_latency.as_millis(),
            ),
            metric_line("spammer_round_confirmed", &labels, sample.confirmed),
            metric_line("spammer_round_failed", &labels, sample.failed),
            metric_line(
                "spammer_gas_fees_total",
                &labels,
                format_coins(self.totals.total_cost),
            ),
        ];
        sink.push(&lines).await;
    }
}

fn format_time(time: SystemTime) -> humantime::Rfc3339Timestamp {
    humantime::format_rfc3339_millis(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Confirmation, GasCost, GasObject, ObjectRef};
    use tracing_test::traced_test;

    fn outcome(index: usize, start_ms: u64, end_ms: u64, settlement: Settlement) -> Outcome {
        thread_local! {
            static BASE: Instant = Instant::now();
        }
        let base = BASE.with(|base| *base);
        Outcome {
            index,
            gas: GasObject {
                reference: ObjectRef {
                    object_id: format!("0x{index}"),
                    version: 1,
                    digest: "d".into(),
                },
                owner: Address::new("0xowner"),
                value: None,
            },
            value_moved: 0,
            started: base + Duration::from_millis(start_ms),
            finished: base + Duration::from_millis(end_ms),
            submitted_at: SystemTime::now(),
            settled_at: SystemTime::now(),
            settlement,
        }
    }

    fn confirmed(digest: &str, success: bool, cost: GasCost) -> Settlement {
        Settlement::Confirmed(Confirmation {
            digest: digest.into(),
            success,
            error: None,
            cost,
            gas_change: None,
        })
    }

    fn cost(computation: u64, storage: u64, rebate: u64) -> GasCost {
        GasCost {
            computation,
            storage,
            rebate,
        }
    }

    #[test]
    fn test_empty_round_is_zero_sample() {
        let sample = aggregate(&[]);
        assert!(sample.all_failed());
        assert_eq!(sample.throughput, 0.0);
        assert_eq!(sample.total_cost, 0);
    }

    #[test]
    fn test_all_failed_round_reports_zero_throughput() {
        let outcomes = vec![
            outcome(0, 0, 100, Settlement::Failed { reason: "x".into() }),
            outcome(1, 0, 120, confirmed("d1", false, cost(10, 0, 0))),
        ];
        let sample = aggregate(&outcomes);

        assert!(sample.all_failed());
        assert_eq!(sample.submitted, 2);
        assert_eq!(sample.failed, 2);
        assert_eq!(sample.throughput, 0.0);
        assert_eq!(sample.time_delta, Duration::ZERO);
        assert_eq!(sample.total_cost, 0);
    }

    #[test]
    fn test_sample_over_confirmed_outcomes_only() {
        let outcomes = vec![
            outcome(0, 0, 400, confirmed("a", true, cost(1_000, 2_000, 500))),
            outcome(1, 100, 300, confirmed("b", true, cost(1_000, 0, 0))),
            outcome(2, 0, 5_000, Settlement::Failed { reason: "x".into() }),
            outcome(3, 200, 1_000, confirmed("c", true, cost(0, 300, 900))),
        ];
        let sample = aggregate(&outcomes);

        assert_eq!(sample.confirmed, 3);
        assert_eq!(sample.failed, 1);
        assert_eq!(sample.time_delta, Duration::from_millis(1_000));
        assert!((sample.throughput - 3.0).abs() < 1e-9);
        // (400 + 200 + 800) / 3
        assert_eq!(sample.avg_latency, Duration::from_nanos(466_666_666));
        assert_eq!(sample.total_cost, 2_500 + 1_000 - 600);
        assert!(sample.max_latency >= sample.p99_latency);
        assert!(sample.p99_latency >= sample.p50_latency);
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let mut outcomes = vec![
            outcome(0, 0, 50, confirmed("a", true, cost(7, 0, 0))),
            outcome(1, 10, 90, confirmed("b", true, cost(3, 0, 0))),
            outcome(2, 5, 60, Settlement::Failed { reason: "x".into() }),
        ];
        let forward = aggregate(&outcomes);
        outcomes.reverse();
        assert_eq!(aggregate(&outcomes), forward);
    }

    #[test]
    fn test_lifetime_totals_accumulate_and_reset() {
        let mut totals = LifetimeTotals::new();
        let sample = MetricsSample {
            submitted: 5,
            confirmed: 4,
            failed: 1,
            total_cost: 100,
            ..Default::default()
        };
        totals.record(&sample);
        totals.record(&MetricsSample {
            submitted: 2,
            failed: 2,
            ..Default::default()
        });

        assert_eq!(totals.rounds, 2);
        assert_eq!(totals.all_failed_rounds, 1);
        assert_eq!(totals.submitted, 7);
        assert_eq!(totals.confirmed, 4);
        assert_eq!(totals.total_cost, 100);

        totals.reset();
        assert_eq!(totals.rounds, 0);
        assert_eq!(totals.total_cost, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_reporter_logs_every_outcome() {
        let mut reporter = RoundReporter::new(WorkerLabels::default(), 2, None);
        let outcomes = vec![
            outcome(0, 0, 10, confirmed("digestA", true, cost(1, 0, 0))),
            outcome(1, 0, 10, Settlement::Failed { reason: "rejected by node".into() }),
        ];

        let sample = reporter.report(&outcomes).await;

        assert_eq!(sample.confirmed, 1);
        assert_eq!(reporter.totals().rounds, 1);
        assert!(logs_contain("digestA"));
        assert!(logs_contain("rejected by node"));
        assert!(logs_contain("Round complete"));
    }

    #[tokio::test]
    async fn test_reporter_appends_round_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MetricsFile::new(dir.path().join("metrics.txt"));
        let labels = WorkerLabels {
            worker: "1".into(),
            ..Default::default()
        };
        let mut reporter = RoundReporter::new(labels, 2, Some(sink.clone()));
        let outcomes = vec![outcome(0, 0, 10, confirmed("digestA", true, cost(1, 0, 0)))];

        reporter.report(&outcomes).await;
        reporter.report(&outcomes).await;

        let contents = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[3], "spammer_round_confirmed{worker=\"1\"} 1");
        assert!(lines.iter().all(|l| l.starts_with("spammer_")));
    }
}
