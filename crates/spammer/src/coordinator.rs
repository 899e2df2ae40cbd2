//! Start-barrier coordination across workers.
//!
//! Every worker funds its pool and builds its first round, then calls
//! [`StartTicket::ready`]. When the last ticket arrives, all waiting workers
//! are released together with the same release instant. If any worker fails
//! its pre-flight (or drops its ticket without arriving), the barrier is
//! aborted and every waiter gets an error instead of a partial start.
//!
//! The release is a one-shot broadcast over a `watch` channel: the state moves
//! from `Pending` to `Released` or `Aborted` exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Errors from the start barrier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("A start barrier needs at least one worker")]
    NoWorkers,

    #[error("Start aborted by worker {worker}: {reason}")]
    Aborted { worker: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GateState {
    Pending,
    Released(Instant),
    Aborted { worker: usize, reason: String },
}

struct Gate {
    workers: usize,
    arrived: AtomicUsize,
    state: watch::Sender<GateState>,
}

impl Gate {
    /// Move out of `Pending`. Later transitions are ignored.
    fn settle(&self, next: GateState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == GateState::Pending {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

/// Observer handle for the barrier, held by the orchestrator.
#[derive(Clone)]
pub struct StartSignal {
    gate: Arc<Gate>,
}

impl StartSignal {
    /// Number of workers the barrier waits for.
    pub fn workers(&self) -> usize {
        self.gate.workers
    }

    /// Release instant, once every worker has arrived.
    pub fn released_at(&self) -> Option<Instant> {
        match &*self.gate.state.borrow() {
            GateState::Released(at) => Some(*at),
            _ => None,
        }
    }

    /// Wait until the barrier is released or aborted.
    pub async fn wait(&self) -> Result<Instant, CoordinatorError> {
        wait_settled(&self.gate).await
    }
}

/// One worker's place at the barrier.
///
/// Consumed by [`StartTicket::ready`] or [`StartTicket::abort`]. Dropping a
/// ticket without using it aborts the barrier.
pub struct StartTicket {
    worker: usize,
    gate: Arc<Gate>,
    armed: bool,
}

impl StartTicket {
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Report pre-flight complete and wait for every other worker.
    ///
    /// Returns the release instant shared by all workers.
    pub async fn ready(mut self) -> Result<Instant, CoordinatorError> {
        self.armed = false;

        let arrived = self.gate.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            worker = self.worker,
            arrived,
            expected = self.gate.workers,
            "Worker ready"
        );

        if arrived == self.gate.workers && self.gate.settle(GateState::Released(Instant::now()))
        {
            info!(workers = self.gate.workers, "All workers ready, starting");
        }

        wait_settled(&self.gate).await
    }

    /// Abort the barrier for every worker.
    pub fn abort(mut self, reason: impl Into<String>) {
        self.armed = false;
        self.fail(reason.into());
    }

    fn fail(&self, reason: String) {
        warn!(worker = self.worker, %reason, "Aborting start barrier");
        self.gate.settle(GateState::Aborted {
            worker: self.worker,
            reason,
        });
    }
}

impl Drop for StartTicket {
    fn drop(&mut self) {
        if self.armed {
            self.fail("worker exited before completing pre-flight".to_string());
        }
    }
}

async fn wait_settled(gate: &Gate) -> Result<Instant, CoordinatorError> {
    let mut rx = gate.state.subscribe();
    let state = rx
        .wait_for(|state| *state != GateState::Pending)
        .await
        .map(|state| state.clone());

    match state {
        Ok(GateState::Released(at)) => Ok(at),
        Ok(GateState::Aborted { worker, reason }) => {
            Err(CoordinatorError::Aborted { worker, reason })
        }
        // The sender lives in the gate, which we hold; it cannot close while we wait.
        Ok(GateState::Pending) | Err(_) => Err(CoordinatorError::Aborted {
            worker: usize::MAX,
            reason: "start signal closed".to_string(),
        }),
    }
}

/// Create a barrier for `workers` workers.
///
/// Returns the observer signal and one ticket per worker, indexed `0..workers`.
pub fn barrier(workers: usize) -> Result<(StartSignal, Vec<StartTicket>), CoordinatorError> {
    if workers == 0 {
        return Err(CoordinatorError::NoWorkers);
    }

    let (state, _) = watch::channel(GateState::Pending);
    let gate = Arc::new(Gate {
        workers,
        arrived: AtomicUsize::new(0),
        state,
    });

    let tickets = (0..workers)
        .map(|worker| StartTicket {
            worker,
            gate: gate.clone(),
            armed: true,
        })
        .collect();

    Ok((StartSignal { gate }, tickets))
}
