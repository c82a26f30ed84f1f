//! Run reports and report persistence

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{is_single_component, PROJECTS_DIR};
use crate::error::ReportError;
use crate::model::{Outcome, Status, TargetKind};

pub const REPORTS_DIR: &str = "reports";
pub const REPORT_FILE: &str = "report.json";

/// Aggregate counts of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub error: usize,
    pub skipped: usize,
}

impl Totals {
    /// Count statuses; always derived from the outcomes themselves
    pub fn tally<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Self {
        let mut totals = Totals::default();
        for outcome in outcomes {
            totals.total += 1;
            match outcome.status {
                Status::Passed => totals.passed += 1,
                Status::Failed => totals.failed += 1,
                Status::Error => totals.error += 1,
                Status::Skipped => totals.skipped += 1,
            }
        }
        totals
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Final result of one run, keyed by its timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub project: String,
    pub identity: String,
    pub kind: TargetKind,
    pub timestamp: String,
    pub threads: usize,
    pub duration_ms: u64,
    pub totals: Totals,
    /// Outcomes keyed by work item (`test@driver`)
    pub outcomes: BTreeMap<String, Outcome>,
    /// Keys in the order outcomes were recorded
    pub completion_order: Vec<String>,
}

impl RunReport {
    pub fn outcome(&self, key: &str) -> Option<&Outcome> {
        self.outcomes.get(key)
    }

    pub fn status(&self, key: &str) -> Option<Status> {
        self.outcome(key).map(|o| o.status)
    }

    /// Outcomes in plan order
    pub fn in_plan_order(&self) -> Vec<&Outcome> {
        let mut outcomes: Vec<&Outcome> = self.outcomes.values().collect();
        outcomes.sort_by_key(|o| o.seq);
        outcomes
    }
}

/// Where finalized reports go
pub trait ReportSink: Send + Sync {
    /// Persist the report, returning its location if it has one
    fn persist(&self, report: &RunReport) -> Result<Option<PathBuf>, ReportError>;
}

/// Writes `projects/<project>/reports/<identity>/<timestamp>/report.json`
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    root: PathBuf,
}

impl JsonReportSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn report_dir(&self, report: &RunReport) -> PathBuf {
        report_dir(&self.root, &report.project, &report.identity, &report.timestamp)
    }
}

pub fn report_dir(root: &Path, project: &str, identity: &str, timestamp: &str) -> PathBuf {
    root.join(PROJECTS_DIR)
        .join(project)
        .join(REPORTS_DIR)
        .join(identity)
        .join(timestamp)
}

/// Reject values that would not land in their own report directory
pub fn check_path_component(field: &'static str, value: &str) -> Result<(), ReportError> {
    if is_single_component(value) {
        Ok(())
    } else {
        Err(ReportError::InvalidPathComponent {
            field,
            value: value.to_string(),
        })
    }
}

impl ReportSink for JsonReportSink {
    fn persist(&self, report: &RunReport) -> Result<Option<PathBuf>, ReportError> {
        check_path_component("project", &report.project)?;
        check_path_component("identity", &report.identity)?;
        check_path_component("timestamp", &report.timestamp)?;
        let dir = self.report_dir(report);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)?;

        info!("Report written to: {}", path.display());
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DriverKind, TestCase, WorkItemId};
    use tempfile::TempDir;

    fn outcome(test: &str, seq: usize, status: Status) -> Outcome {
        Outcome {
            id: WorkItemId::new(TestCase::new(test), DriverKind::Chrome),
            seq,
            status,
            duration_ms: 10,
            detail: None,
            output: None,
            session: None,
        }
    }

    fn report(outcomes: Vec<Outcome>) -> RunReport {
        let completion_order = outcomes.iter().map(|o| o.id.key()).collect();
        let totals = Totals::tally(&outcomes);
        RunReport {
            project: "demo".into(),
            identity: "smoke".into(),
            kind: TargetKind::Suite,
            timestamp: "2024.05.06.07.08.09.000001".into(),
            threads: 1,
            duration_ms: 20,
            totals,
            outcomes: outcomes.into_iter().map(|o| (o.id.key(), o)).collect(),
            completion_order,
        }
    }

    #[test]
    fn test_tally_counts_every_status() {
        let outcomes = vec![
            outcome("a", 0, Status::Passed),
            outcome("b", 1, Status::Failed),
            outcome("c", 2, Status::Error),
            outcome("d", 3, Status::Skipped),
            outcome("e", 4, Status::Passed),
        ];
        let totals = Totals::tally(&outcomes);
        assert_eq!(
            totals,
            Totals {
                total: 5,
                passed: 2,
                failed: 1,
                error: 1,
                skipped: 1,
            }
        );
        assert!(!totals.all_passed());
    }

    #[test]
    fn test_plan_order_ignores_completion_order() {
        let report = report(vec![outcome("z", 1, Status::Passed), outcome("a", 0, Status::Failed)]);
        let seqs: Vec<usize> = report.in_plan_order().iter().map(|o| o.seq).collect();
        assert_eq!(seqs, [0, 1]);
        assert_eq!(report.completion_order, ["z@chrome", "a@chrome"]);
    }

    #[test]
    fn test_json_sink_writes_under_timestamp() {
        let tmp = TempDir::new().unwrap();
        let sink = JsonReportSink::new(tmp.path());
        let report = report(vec![outcome("login.valid_user", 0, Status::Passed)]);

        let path = sink.persist(&report).unwrap().unwrap();
        assert_eq!(
            path,
            tmp.path()
                .join("projects/demo/reports/smoke/2024.05.06.07.08.09.000001/report.json")
        );

        let written: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, report);
        assert_eq!(written.status("login.valid_user@chrome"), Some(Status::Passed));
    }

    #[test]
    fn test_json_sink_refuses_escaping_components() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let sink = JsonReportSink::new(&root);

        let mut escaping = report(vec![outcome("a", 0, Status::Passed)]);
        escaping.timestamp = "../../../escape".into();
        let err = sink.persist(&escaping).unwrap_err();
        assert!(matches!(err, ReportError::InvalidPathComponent { field: "timestamp", .. }));

        let mut escaping = report(vec![outcome("a", 0, Status::Passed)]);
        escaping.identity = "..".into();
        assert!(sink.persist(&escaping).is_err());

        assert!(!root.exists());
        assert!(!tmp.path().join("escape").exists());
    }
}
