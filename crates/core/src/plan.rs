//! Execution plan building

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DriverKind, RunContext, TargetKind, WorkItem, WorkItemId};
use crate::resolver::Resolution;

/// Timestamp layout used to key run reports
pub const TIMESTAMP_FORMAT: &str = "%Y.%m.%d.%H.%M.%S.%6f";

/// Ordered work for one run
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub project: String,
    pub identity: String,
    pub kind: TargetKind,
    pub threads: usize,
    pub timestamp: String,
    pub items: Vec<WorkItem>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Concurrent workers needed for this plan
    pub fn workers(&self) -> usize {
        self.threads.max(1)
    }

    /// Distinct driver kinds, in first-use order
    pub fn driver_kinds(&self) -> Vec<DriverKind> {
        let mut kinds = Vec::new();
        for item in &self.items {
            if !kinds.contains(&item.id.driver) {
                kinds.push(item.id.driver);
            }
        }
        kinds
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            project: self.project.clone(),
            identity: self.identity.clone(),
            kind: self.kind,
            threads: self.threads,
            timestamp: self.timestamp.clone(),
            items: self.items.len(),
            drivers: self.driver_kinds(),
        }
    }
}

/// Plan header, for logging and dry runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub project: String,
    pub identity: String,
    pub kind: TargetKind,
    pub threads: usize,
    pub timestamp: String,
    pub items: usize,
    pub drivers: Vec<DriverKind>,
}

/// Expand a resolution into work items, test-major:
/// `[t1@a, t1@b, t2@a, t2@b, ...]`.
pub fn build_plan(resolution: &Resolution, context: &RunContext) -> ExecutionPlan {
    let drivers: Vec<DriverKind> = if context.drivers.is_empty() {
        vec![context.default_driver]
    } else {
        let mut unique = Vec::with_capacity(context.drivers.len());
        for kind in &context.drivers {
            if !unique.contains(kind) {
                unique.push(*kind);
            }
        }
        unique
    };

    let timestamp = if context.timestamp.trim().is_empty() {
        generate_timestamp()
    } else {
        context.timestamp.clone()
    };

    let identity = resolution.identity();
    let mut items = Vec::with_capacity(resolution.tests().len() * drivers.len());
    for test in resolution.tests() {
        for driver in &drivers {
            items.push(WorkItem {
                id: WorkItemId::new(test.clone(), *driver),
                seq: items.len(),
                project: context.project.clone(),
                identity: identity.clone(),
                timestamp: timestamp.clone(),
                environment: context.environment.clone(),
            });
        }
    }

    ExecutionPlan {
        project: context.project.clone(),
        identity,
        kind: context.kind,
        threads: context.threads,
        timestamp,
        items,
    }
}

static LAST_TIMESTAMP_MICROS: AtomicI64 = AtomicI64::new(0);

/// UTC wall-clock timestamp with microsecond precision.
///
/// Strictly increasing within the process: a call landing on the same
/// microsecond as the previous one is pushed one microsecond forward. UTC
/// keeps string order equal to time order across DST changes.
pub fn generate_timestamp() -> String {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_TIMESTAMP_MICROS.load(Ordering::Relaxed);
    let micros = loop {
        let candidate = now.max(last + 1);
        match LAST_TIMESTAMP_MICROS.compare_exchange_weak(
            last,
            candidate,
            Ordering::SeqCst,
            Ordering::Relaxed,
        ) {
            Ok(_) => break candidate,
            Err(actual) => last = actual,
        }
    };

    DateTime::<Utc>::from_timestamp_micros(micros)
        .unwrap_or_else(Utc::now)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DeclaredSuite, SuiteConfig};
    use crate::model::TestCase;
    use std::collections::{BTreeMap, HashSet};

    fn context(kind: TargetKind, drivers: Vec<DriverKind>, timestamp: &str) -> RunContext {
        RunContext {
            project: "demo".into(),
            kind,
            threads: 2,
            drivers,
            default_driver: DriverKind::Chrome,
            timestamp: timestamp.into(),
            environment: BTreeMap::new(),
        }
    }

    fn smoke() -> Resolution {
        Resolution::DeclaredSuite(DeclaredSuite {
            name: "smoke".into(),
            tests: vec![TestCase::new("test_a"), TestCase::new("test_b"), TestCase::new("test_c")],
            config: SuiteConfig::default(),
        })
    }

    #[test]
    fn test_cross_product_is_test_major() {
        let ctx = context(
            TargetKind::Suite,
            vec![DriverKind::Chrome, DriverKind::Firefox],
            "t1",
        );
        let plan = build_plan(&smoke(), &ctx);
        assert_eq!(plan.len(), 6);
        let keys: Vec<String> = plan.items.iter().map(|i| i.id.key()).collect();
        assert_eq!(
            keys,
            [
                "test_a@chrome",
                "test_a@firefox",
                "test_b@chrome",
                "test_b@firefox",
                "test_c@chrome",
                "test_c@firefox",
            ]
        );
        let seqs: Vec<usize> = plan.items.iter().map(|i| i.seq).collect();
        assert_eq!(seqs, [0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_single_test_fans_out_per_driver() {
        let resolution = Resolution::SingleTest(TestCase::new("login.valid_user"));
        let ctx = context(
            TargetKind::SingleTest,
            vec![DriverKind::Chrome, DriverKind::Firefox],
            "t1",
        );
        let plan = build_plan(&resolution, &ctx);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.driver_kinds(), [DriverKind::Chrome, DriverKind::Firefox]);
    }

    #[test]
    fn test_default_driver_when_none_requested() {
        let mut ctx = context(TargetKind::Suite, vec![], "t1");
        ctx.default_driver = DriverKind::Firefox;
        let plan = build_plan(&smoke(), &ctx);
        assert_eq!(plan.len(), 3);
        assert!(plan.items.iter().all(|i| i.id.driver == DriverKind::Firefox));
    }

    #[test]
    fn test_repeated_driver_is_planned_once() {
        let ctx = context(
            TargetKind::Suite,
            vec![DriverKind::Chrome, DriverKind::Chrome],
            "t1",
        );
        assert_eq!(build_plan(&smoke(), &ctx).len(), 3);
    }

    #[test]
    fn test_timestamp_and_threads_copied_verbatim() {
        let ctx = context(TargetKind::Suite, vec![], "2024.01.02.03.04.05.000006");
        let plan = build_plan(&smoke(), &ctx);
        assert_eq!(plan.timestamp, "2024.01.02.03.04.05.000006");
        assert_eq!(plan.threads, 2);
        assert!(plan.items.iter().all(|i| i.timestamp == plan.timestamp));
    }

    #[test]
    fn test_empty_timestamp_is_generated() {
        let ctx = context(TargetKind::Suite, vec![], "");
        let first = build_plan(&smoke(), &ctx);
        let second = build_plan(&smoke(), &ctx);
        assert!(!first.timestamp.is_empty());
        assert_ne!(first.timestamp, second.timestamp);
    }

    #[test]
    fn test_generated_timestamps_never_collide() {
        let stamps: Vec<String> = (0..500).map(|_| generate_timestamp()).collect();
        let unique: HashSet<&String> = stamps.iter().collect();
        assert_eq!(unique.len(), stamps.len());
        // Fixed-width layout, so string order is time order
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_generated_timestamp_is_utc() {
        let before = Utc::now().naive_utc();
        let stamp = generate_timestamp();
        let (seconds, micros) = stamp.rsplit_once('.').unwrap();
        assert_eq!(micros.len(), 6);
        let parsed = chrono::NaiveDateTime::parse_from_str(seconds, "%Y.%m.%d.%H.%M.%S").unwrap();
        let drift = (parsed - before).num_seconds().abs();
        assert!(drift <= 2, "{stamp} is {drift}s away from UTC now");
    }

    #[test]
    fn test_empty_suite_yields_empty_plan() {
        let resolution = Resolution::DeclaredSuite(DeclaredSuite {
            name: "empty".into(),
            tests: vec![],
            config: SuiteConfig::default(),
        });
        let plan = build_plan(&resolution, &context(TargetKind::Suite, vec![], "t1"));
        assert!(plan.is_empty());
        assert_eq!(plan.workers(), 2);
    }
}
