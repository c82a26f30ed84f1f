//! Outcome aggregation
//!
//! Workers record outcomes from any task; `finalize` waits until every planned
//! work item has one.

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::AggregateError;
use crate::model::{Outcome, TargetKind};
use crate::plan::ExecutionPlan;
use crate::report::{RunReport, Totals};

#[derive(Default)]
struct Recorded {
    outcomes: BTreeMap<String, Outcome>,
    order: Vec<String>,
}

/// Collects one outcome per work item of a plan
pub struct Aggregator {
    project: String,
    identity: String,
    kind: TargetKind,
    timestamp: String,
    threads: usize,
    expected: HashSet<String>,
    started: Instant,
    recorded: Mutex<Recorded>,
    count: watch::Sender<usize>,
}

impl Aggregator {
    pub fn new(plan: &ExecutionPlan) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            project: plan.project.clone(),
            identity: plan.identity.clone(),
            kind: plan.kind,
            timestamp: plan.timestamp.clone(),
            threads: plan.threads,
            expected: plan.items.iter().map(|i| i.id.key()).collect(),
            started: Instant::now(),
            recorded: Mutex::new(Recorded::default()),
            count,
        }
    }

    /// Record the outcome of one work item. A second outcome for the same
    /// item is rejected and leaves the first one in place.
    pub fn record(&self, outcome: Outcome) -> Result<(), AggregateError> {
        let key = outcome.id.key();
        if !self.expected.contains(&key) {
            warn!(item = %key, "Outcome for unplanned work item");
            return Err(AggregateError::Unexpected(key));
        }

        let count = {
            let mut recorded = self.recorded.lock();
            if recorded.outcomes.contains_key(&key) {
                warn!(item = %key, "Outcome recorded twice");
                return Err(AggregateError::Duplicate(key));
            }
            debug!(item = %key, status = %outcome.status, "Recorded outcome");
            recorded.order.push(key.clone());
            recorded.outcomes.insert(key, outcome);
            recorded.outcomes.len()
        };
        self.count.send_replace(count);
        Ok(())
    }

    /// Whether an outcome exists for the work item key
    pub fn has(&self, key: &str) -> bool {
        self.recorded.lock().outcomes.contains_key(key)
    }

    /// Wait for all expected outcomes, then build the report.
    ///
    /// On timeout the error lists the work items still missing.
    pub async fn finalize(&self, timeout: Duration) -> Result<RunReport, AggregateError> {
        let expected = self.expected.len();
        let wait_started = Instant::now();
        let mut rx = self.count.subscribe();
        let done = tokio::time::timeout(timeout, rx.wait_for(|n| *n >= expected))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);

        let recorded = self.recorded.lock();
        if !done && recorded.outcomes.len() < expected {
            let mut missing: Vec<String> = self
                .expected
                .iter()
                .filter(|k| !recorded.outcomes.contains_key(*k))
                .cloned()
                .collect();
            missing.sort();
            return Err(AggregateError::Timeout {
                waited_ms: wait_started.elapsed().as_millis() as u64,
                missing,
            });
        }

        Ok(RunReport {
            project: self.project.clone(),
            identity: self.identity.clone(),
            kind: self.kind,
            timestamp: self.timestamp.clone(),
            threads: self.threads,
            duration_ms: self.started.elapsed().as_millis() as u64,
            totals: Totals::tally(recorded.outcomes.values()),
            outcomes: recorded.outcomes.clone(),
            completion_order: recorded.order.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DeclaredSuite, SuiteConfig};
    use crate::model::{DriverKind, RunContext, Status, TestCase};
    use crate::plan::build_plan;
    use crate::resolver::Resolution;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn plan(tests: &[&str]) -> ExecutionPlan {
        let resolution = Resolution::DeclaredSuite(DeclaredSuite {
            name: "smoke".into(),
            tests: tests.iter().map(|t| TestCase::new(*t)).collect(),
            config: SuiteConfig::default(),
        });
        let context = RunContext {
            project: "demo".into(),
            kind: TargetKind::Suite,
            threads: 2,
            drivers: vec![],
            default_driver: DriverKind::Chrome,
            timestamp: "ts".into(),
            environment: BTreeMap::new(),
        };
        build_plan(&resolution, &context)
    }

    #[tokio::test]
    async fn test_finalize_after_all_recorded() {
        let plan = plan(&["test_a", "test_b"]);
        let aggregator = Aggregator::new(&plan);

        aggregator
            .record(Outcome::new(&plan.items[1], Status::Failed, Duration::from_millis(50)))
            .unwrap();
        aggregator
            .record(Outcome::new(&plan.items[0], Status::Passed, Duration::from_millis(200)))
            .unwrap();

        let report = aggregator.finalize(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.timestamp, "ts");
        assert_eq!(report.status("test_a@chrome"), Some(Status::Passed));
        assert_eq!(report.status("test_b@chrome"), Some(Status::Failed));
        assert_eq!(report.totals.passed, 1);
        assert_eq!(report.totals.failed, 1);
        assert_eq!(report.totals.error, 0);
        assert_eq!(report.completion_order, ["test_b@chrome", "test_a@chrome"]);
    }

    #[tokio::test]
    async fn test_duplicate_record_is_signalled() {
        let plan = plan(&["test_a"]);
        let aggregator = Aggregator::new(&plan);
        let item = &plan.items[0];

        aggregator
            .record(Outcome::new(item, Status::Passed, Duration::ZERO))
            .unwrap();
        let err = aggregator
            .record(Outcome::new(item, Status::Failed, Duration::ZERO))
            .unwrap_err();
        assert_eq!(err, AggregateError::Duplicate("test_a@chrome".into()));

        let report = aggregator.finalize(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.status("test_a@chrome"), Some(Status::Passed));
        assert_eq!(report.totals.total, 1);
    }

    #[tokio::test]
    async fn test_unplanned_outcome_is_rejected() {
        let plan_a = plan(&["test_a"]);
        let plan_b = plan(&["test_b"]);
        let aggregator = Aggregator::new(&plan_a);
        let err = aggregator
            .record(Outcome::new(&plan_b.items[0], Status::Passed, Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, AggregateError::Unexpected(_)));
    }

    #[tokio::test]
    async fn test_finalize_times_out_with_missing_items() {
        let plan = plan(&["test_a", "test_b", "test_c"]);
        let aggregator = Aggregator::new(&plan);
        aggregator
            .record(Outcome::new(&plan.items[1], Status::Passed, Duration::ZERO))
            .unwrap();

        let err = aggregator
            .finalize(Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            AggregateError::Timeout { missing, .. } => {
                assert_eq!(missing, ["test_a@chrome", "test_c@chrome"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_finalize_waits_for_late_outcomes() {
        let plan = plan(&["test_a"]);
        let aggregator = Arc::new(Aggregator::new(&plan));

        let late = {
            let aggregator = aggregator.clone();
            let item = plan.items[0].clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                aggregator
                    .record(Outcome::new(&item, Status::Passed, Duration::ZERO))
                    .unwrap();
            })
        };

        let report = aggregator.finalize(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.totals.passed, 1);
        late.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_plan_finalizes_immediately() {
        let plan = plan(&[]);
        let aggregator = Aggregator::new(&plan);
        let report = aggregator.finalize(Duration::from_millis(1)).await.unwrap();
        assert_eq!(report.totals, Totals::default());
    }
}
