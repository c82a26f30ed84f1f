//! Shared fixtures for orchestration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use golem_core::error::{ExecError, PoolError};
use golem_core::{
    DriverKind, DriverSession, Execution, Executor, FsCatalog, JsonReportSink, Orchestrator,
    SessionFactory, Settings, WorkItem,
};

pub struct MockSession {
    id: String,
    kind: DriverKind,
    closed: Arc<AtomicUsize>,
}

impl DriverSession for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn endpoint(&self) -> &str {
        "http://127.0.0.1:9515"
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Session factory counting launches; kinds in `broken` never start
#[derive(Default)]
pub struct MockFactory {
    pub launches: Mutex<HashMap<DriverKind, usize>>,
    pub closed: Arc<AtomicUsize>,
    pub broken: Vec<DriverKind>,
}

impl MockFactory {
    pub fn broken(kinds: &[DriverKind]) -> Self {
        Self {
            broken: kinds.to_vec(),
            ..Default::default()
        }
    }

    pub fn launches(&self, kind: DriverKind) -> usize {
        self.launches.lock().get(&kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn launch(&self, kind: DriverKind) -> Result<Box<dyn DriverSession>, PoolError> {
        let n = {
            let mut launches = self.launches.lock();
            let n = launches.entry(kind).or_insert(0);
            *n += 1;
            *n
        };
        if self.broken.contains(&kind) {
            return Err(PoolError::Launch {
                kind,
                reason: "browser binary crashed on startup".into(),
            });
        }
        Ok(Box::new(MockSession {
            id: format!("{}-{}", kind, n),
            kind,
            closed: self.closed.clone(),
        }))
    }
}

/// What the mock executor does for a test case
#[derive(Debug, Clone)]
pub enum Script {
    Pass(Duration),
    Fail(Duration),
    Panic,
    Hang,
}

/// Executor driven by a per-test script; unscripted tests pass at once
#[derive(Default)]
pub struct MockExecutor {
    scripts: HashMap<String, Script>,
    /// Item keys in the order execution started
    pub started: Mutex<Vec<String>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, test: &str, script: Script) -> Self {
        self.scripts.insert(test.to_string(), script);
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(
        &self,
        item: &WorkItem,
        _session: &dyn DriverSession,
    ) -> Result<Execution, ExecError> {
        self.started.lock().push(item.id.key());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let script = self
            .scripts
            .get(item.test().as_str())
            .cloned()
            .unwrap_or(Script::Pass(Duration::ZERO));

        let result = match script {
            Script::Pass(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Execution::passed())
            }
            Script::Fail(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Execution::failed("expected element was not visible"))
            }
            Script::Panic => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("executor blew up on {}", item.id);
            }
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Execution::passed())
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Write a project: empty test files plus `suites/<name>.yaml` bodies
pub fn write_project(root: &Path, project: &str, tests: &[&str], suites: &[(&str, &str)]) {
    let project_dir = root.join("projects").join(project);
    for test in tests {
        let path = project_dir.join("tests").join(test);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "// test\n").unwrap();
    }
    let suites_dir = project_dir.join("suites");
    std::fs::create_dir_all(&suites_dir).unwrap();
    for (name, body) in suites {
        std::fs::write(suites_dir.join(format!("{}.yaml", name)), body).unwrap();
    }
}

pub fn settings() -> Settings {
    Settings {
        test_timeout_secs: 1,
        finalize_grace_secs: 5,
        ..Settings::default()
    }
}

pub fn orchestrator(
    tmp: &TempDir,
    settings: Settings,
    factory: Arc<MockFactory>,
    executor: Arc<MockExecutor>,
) -> Orchestrator {
    let catalog = FsCatalog::new(tmp.path(), settings.test_extension.clone());
    Orchestrator::new(Arc::new(catalog), settings, factory, executor)
        .with_sink(Arc::new(JsonReportSink::new(tmp.path())))
}
