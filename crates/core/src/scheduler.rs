//! Worker scheduler
//!
//! A fixed number of workers pull work items off a shared FIFO queue. Each
//! worker acquires a driver session, runs the item through the executor and
//! records exactly one outcome, whatever happens in between.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::executor::Executor;
use crate::model::{Outcome, Status, WorkItem};
use crate::plan::ExecutionPlan;
use crate::pool::DriverPool;

/// Lifecycle of one scheduled run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    /// Work items are still waiting in the queue
    Dispatching,
    /// Queue is empty, in-flight items are finishing
    Draining,
    Completed,
}

/// Counters returned by [`Scheduler::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub workers: usize,
    pub dispatched: usize,
    pub skipped: usize,
}

struct Shared {
    pool: Arc<DriverPool>,
    executor: Arc<dyn Executor>,
    aggregator: Arc<Aggregator>,
    queue: Mutex<VecDeque<WorkItem>>,
    /// Item each worker is currently handling, by worker index
    in_flight: Mutex<HashMap<usize, WorkItem>>,
    item_timeout: Duration,
    cancel: CancellationToken,
    state: Arc<watch::Sender<RunState>>,
}

impl Shared {
    fn dequeue(&self) -> Option<WorkItem> {
        let mut queue = self.queue.lock();
        let item = queue.pop_front();
        if queue.is_empty() {
            self.state.send_if_modified(|state| {
                if *state == RunState::Dispatching {
                    *state = RunState::Draining;
                    true
                } else {
                    false
                }
            });
        }
        item
    }
}

/// Runs an execution plan on a bounded set of workers
pub struct Scheduler {
    pool: Arc<DriverPool>,
    executor: Arc<dyn Executor>,
    item_timeout: Duration,
    cancel: CancellationToken,
    state: Arc<watch::Sender<RunState>>,
}

impl Scheduler {
    pub fn new(pool: Arc<DriverPool>, executor: Arc<dyn Executor>, item_timeout: Duration) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            pool,
            executor,
            item_timeout,
            cancel: CancellationToken::new(),
            state: Arc::new(state),
        }
    }

    /// Use an externally owned token, e.g. one tied to Ctrl-C
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Watch the run state
    pub fn state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Run every item of the plan, recording one outcome per item.
    ///
    /// Cancellation stops dispatch; items already running finish and the
    /// rest are recorded as skipped.
    pub async fn run(&self, plan: &ExecutionPlan, aggregator: Arc<Aggregator>) -> DispatchStats {
        if plan.is_empty() {
            self.state.send_replace(RunState::Completed);
            return DispatchStats::default();
        }

        let workers = plan.workers().min(plan.len());
        info!(
            items = plan.len(),
            workers,
            timestamp = %plan.timestamp,
            "Dispatching {} ({})",
            plan.identity,
            plan.kind
        );

        let shared = Arc::new(Shared {
            pool: self.pool.clone(),
            executor: self.executor.clone(),
            aggregator,
            queue: Mutex::new(plan.items.iter().cloned().collect()),
            in_flight: Mutex::new(HashMap::new()),
            item_timeout: self.item_timeout,
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        });
        self.state.send_replace(RunState::Dispatching);

        let mut set = JoinSet::new();
        for worker in 0..workers {
            set.spawn(run_worker(worker, shared.clone()));
        }

        let mut dispatched = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(handled) => dispatched += handled,
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        // Items held by a worker that died never got an outcome
        let orphaned: Vec<WorkItem> = shared.in_flight.lock().drain().map(|(_, item)| item).collect();
        for item in orphaned {
            if shared.aggregator.has(&item.id.key()) {
                continue;
            }
            dispatched += 1;
            let outcome = Outcome::error(&item, Duration::ZERO, "worker task died before recording an outcome");
            if let Err(e) = shared.aggregator.record(outcome) {
                error!(item = %item.id, "Failed to record orphaned item: {}", e);
            }
        }

        self.state.send_replace(RunState::Draining);

        // Whatever is left was never started
        let remaining: Vec<WorkItem> = shared.queue.lock().drain(..).collect();
        let skipped = remaining.len();
        for item in remaining {
            if let Err(e) = shared.aggregator.record(Outcome::skipped(&item)) {
                error!(item = %item.id, "Failed to record skipped item: {}", e);
            }
        }
        if skipped > 0 {
            warn!(skipped, "Run cancelled, unstarted work items skipped");
        }

        self.state.send_replace(RunState::Completed);
        DispatchStats {
            workers,
            dispatched,
            skipped,
        }
    }
}

async fn run_worker(worker: usize, shared: Arc<Shared>) -> usize {
    let mut handled = 0;
    loop {
        if shared.cancel.is_cancelled() {
            debug!(worker, "Cancelled, worker stopping");
            break;
        }
        let Some(item) = shared.dequeue() else {
            break;
        };

        debug!(worker, item = %item.id, "Dispatched");
        shared.in_flight.lock().insert(worker, item.clone());
        let started = Instant::now();
        let outcome = match AssertUnwindSafe(run_item(&shared, &item)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(worker, item = %item.id, "Worker panicked: {}", panic_message(&*panic));
                Outcome::error(
                    &item,
                    started.elapsed(),
                    format!("worker panicked: {}", panic_message(&*panic)),
                )
            }
        };
        debug!(worker, item = %item.id, status = %outcome.status, "Finished");

        if let Err(e) = shared.aggregator.record(outcome) {
            error!(worker, item = %item.id, "Outcome bookkeeping failed, cancelling run: {}", e);
            shared.cancel.cancel();
        }
        shared.in_flight.lock().remove(&worker);
        handled += 1;
    }
    handled
}

/// Acquire, execute, release. Every non-panicking path yields an outcome.
async fn run_item(shared: &Shared, item: &WorkItem) -> Outcome {
    let acquire_started = Instant::now();
    let mut guard = match shared.pool.acquire(item.driver()).await {
        Ok(guard) => guard,
        Err(e) => return Outcome::error(item, acquire_started.elapsed(), e.to_string()),
    };
    let session = guard.id().to_string();

    let started = Instant::now();
    let result = tokio::time::timeout(
        shared.item_timeout,
        AssertUnwindSafe(shared.executor.execute(item, guard.session())).catch_unwind(),
    )
    .await;
    let elapsed = started.elapsed();

    let outcome = match result {
        Ok(Ok(Ok(execution))) => {
            let status = if execution.passed {
                Status::Passed
            } else {
                Status::Failed
            };
            let mut outcome = Outcome::new(item, status, elapsed).with_output(execution.output);
            outcome.detail = execution.detail;
            outcome
        }
        Ok(Ok(Err(e))) => {
            if e.poisons_session() {
                guard.discard();
            }
            Outcome::error(item, elapsed, e.to_string())
        }
        Ok(Err(panic)) => {
            guard.discard();
            Outcome::error(
                item,
                elapsed,
                format!("test execution panicked: {}", panic_message(&*panic)),
            )
        }
        Err(_) => {
            warn!(item = %item.id, "Timed out after {:?}", shared.item_timeout);
            guard.discard();
            Outcome::error(
                item,
                elapsed,
                format!("test timed out after {:?}", shared.item_timeout),
            )
        }
    };

    shared.pool.release(guard);
    outcome.with_session(&session)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
