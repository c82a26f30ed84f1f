//! Core run data model

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Settings;
use crate::resolver::Resolution;

/// A test case, identified by its dotted path inside the project test tree
/// (`login.valid_user` for `tests/login/valid_user.<ext>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestCase(String);

impl TestCase {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Build a test case from path components relative to the test tree
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        Self(joined.join("."))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Leaf name without its directories
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Whether this test case lives (at any depth) under the dotted directory
    pub fn is_under(&self, directory: &str) -> bool {
        if directory.is_empty() {
            return true;
        }
        self.0.len() > directory.len()
            && self.0.starts_with(directory)
            && self.0.as_bytes()[directory.len()] == b'.'
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Path order: compare segment by segment so `a.z` sorts before `a_b.c`
// exactly as the directory tree would.
impl Ord for TestCase {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments().cmp(other.segments())
    }
}

impl PartialOrd for TestCase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Browser/automation backend a test case runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Chrome,
    Firefox,
    Edge,
    Safari,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Chrome => "chrome",
            DriverKind::Firefox => "firefox",
            DriverKind::Edge => "edge",
            DriverKind::Safari => "safari",
        }
    }

    /// WebDriver server binary looked up on `PATH` when settings name none
    pub fn default_binary(&self) -> &'static str {
        match self {
            DriverKind::Chrome => "chromedriver",
            DriverKind::Firefox => "geckodriver",
            DriverKind::Edge => "msedgedriver",
            DriverKind::Safari => "safaridriver",
        }
    }

    /// Command line arguments selecting the listen port
    pub fn port_args(&self, port: u16) -> Vec<String> {
        match self {
            DriverKind::Chrome | DriverKind::Edge => vec![format!("--port={}", port)],
            DriverKind::Firefox => vec!["--port".to_string(), port.to_string()],
            DriverKind::Safari => vec!["-p".to_string(), port.to_string()],
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown driver '{0}' (expected one of: chrome, firefox, edge, safari)")]
pub struct UnknownDriver(pub String);

impl FromStr for DriverKind {
    type Err = UnknownDriver;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Ok(DriverKind::Chrome),
            "firefox" | "gecko" => Ok(DriverKind::Firefox),
            "edge" | "msedge" => Ok(DriverKind::Edge),
            "safari" => Ok(DriverKind::Safari),
            _ => Err(UnknownDriver(s.to_string())),
        }
    }
}

/// What the target string resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Suite,
    DirectorySuite,
    SingleTest,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::Suite => "suite",
            TargetKind::DirectorySuite => "directory suite",
            TargetKind::SingleTest => "test",
        })
    }
}

/// Caller input for one run, as given on the command line
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub project: String,
    pub target: String,
    pub threads: Option<usize>,
    pub drivers: Vec<DriverKind>,
    pub timestamp: Option<String>,
}

/// Immutable configuration of one run.
///
/// Built once from the request, the resolution and the settings, then only
/// read by the plan builder and the scheduler.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub project: String,
    pub kind: TargetKind,
    /// 0 and 1 both mean sequential execution
    pub threads: usize,
    pub drivers: Vec<DriverKind>,
    pub default_driver: DriverKind,
    /// Empty means "generate one when the plan is built"
    pub timestamp: String,
    pub environment: BTreeMap<String, String>,
}

impl RunContext {
    /// Merge command line input over suite-stored configuration.
    ///
    /// Suite values for threads and drivers only apply when the request does
    /// not carry its own; suite environment overrides settings environment.
    pub fn new(request: &RunRequest, resolution: &Resolution, settings: &Settings) -> Self {
        let suite = resolution.suite_config();

        let threads = request
            .threads
            .or_else(|| suite.and_then(|s| s.threads))
            .unwrap_or(0);

        let drivers = if !request.drivers.is_empty() {
            request.drivers.clone()
        } else {
            suite.map(|s| s.drivers.clone()).unwrap_or_default()
        };

        let mut environment = settings.environment.clone();
        if let Some(suite) = suite {
            environment.extend(suite.environment.clone());
        }

        Self {
            project: request.project.clone(),
            kind: resolution.kind(),
            threads,
            drivers,
            default_driver: settings.default_driver,
            timestamp: request.timestamp.clone().unwrap_or_default(),
            environment,
        }
    }
}

/// Identity of one work item: a test case bound to a driver kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId {
    pub test: TestCase,
    pub driver: DriverKind,
}

impl WorkItemId {
    pub fn new(test: TestCase, driver: DriverKind) -> Self {
        Self { test, driver }
    }

    /// Report key, `login.valid_user@chrome`
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.test, self.driver)
    }
}

/// One (test case, driver) pairing scheduled for a single run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: WorkItemId,
    /// Position in the plan
    pub seq: usize,
    pub project: String,
    /// Suite name, directory or test path the run was started for
    pub identity: String,
    pub timestamp: String,
    pub environment: BTreeMap<String, String>,
}

impl WorkItem {
    pub fn test(&self) -> &TestCase {
        &self.id.test
    }

    pub fn driver(&self) -> DriverKind {
        self.id.driver
    }
}

/// Terminal status of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Error,
    /// Only used for items a cancelled run never started
    Skipped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Error => "error",
            Status::Skipped => "skipped",
        })
    }
}

/// Result of one work item; produced exactly once and never changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: WorkItemId,
    pub seq: usize,
    pub status: Status,
    pub duration_ms: u64,
    pub detail: Option<String>,
    pub output: Option<String>,
    pub session: Option<String>,
}

impl Outcome {
    pub fn new(item: &WorkItem, status: Status, duration: Duration) -> Self {
        Self {
            id: item.id.clone(),
            seq: item.seq,
            status,
            duration_ms: duration.as_millis() as u64,
            detail: None,
            output: None,
            session: None,
        }
    }

    pub fn error(item: &WorkItem, duration: Duration, detail: impl Into<String>) -> Self {
        Self::new(item, Status::Error, duration).with_detail(detail)
    }

    pub fn skipped(item: &WorkItem) -> Self {
        Self::new(item, Status::Skipped, Duration::ZERO).with_detail("run cancelled before dispatch")
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    pub fn with_session(mut self, session: &str) -> Self {
        self.session = Some(session.to_string());
        self
    }
}
