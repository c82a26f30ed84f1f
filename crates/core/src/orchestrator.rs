//! Run orchestration: resolve, plan, schedule, aggregate, persist

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::catalog::{Catalog, FsCatalog};
use crate::config::Settings;
use crate::error::Result;
use crate::executor::{CommandExecutor, Executor};
use crate::model::{RunContext, RunRequest};
use crate::plan::{build_plan, ExecutionPlan};
use crate::pool::{DriverPool, SessionFactory};
use crate::report::{check_path_component, JsonReportSink, ReportSink, RunReport};
use crate::resolver::{resolve, Resolution};
use crate::scheduler::Scheduler;
use crate::webdriver::WebDriverFactory;

/// Drives a run from a [`RunRequest`] to a persisted [`RunReport`]
pub struct Orchestrator {
    catalog: Arc<dyn Catalog>,
    settings: Settings,
    factory: Arc<dyn SessionFactory>,
    executor: Arc<dyn Executor>,
    sink: Option<Arc<dyn ReportSink>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        settings: Settings,
        factory: Arc<dyn SessionFactory>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            catalog,
            settings,
            factory,
            executor,
            sink: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Production wiring for a project under `root`: filesystem catalog,
    /// WebDriver sessions, command executor and JSON reports.
    pub fn for_project(root: &Path, project: &str) -> Result<Self> {
        let settings = Settings::load(root, Some(project))?;
        let catalog = FsCatalog::new(root, settings.test_extension.clone());
        let executor = CommandExecutor::new(catalog.clone(), settings.test_command.clone());
        let factory = WebDriverFactory::new(settings.clone())?;

        Ok(Self::new(
            Arc::new(catalog),
            settings,
            Arc::new(factory),
            Arc::new(executor),
        )
        .with_sink(Arc::new(JsonReportSink::new(root))))
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Cancelling stops dispatch of every run started by this orchestrator
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn resolve(&self, project: &str, target: &str) -> Result<Resolution> {
        Ok(resolve(self.catalog.as_ref(), project, target)?)
    }

    /// Resolve the request and expand it into work items without running
    pub fn plan(&self, request: &RunRequest) -> Result<ExecutionPlan> {
        let resolution = self.resolve(&request.project, &request.target)?;
        match request.timestamp.as_deref().map(str::trim) {
            Some(timestamp) if !timestamp.is_empty() => check_path_component("timestamp", timestamp)?,
            _ => {}
        }
        let context = RunContext::new(request, &resolution, &self.settings);
        Ok(build_plan(&resolution, &context))
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let plan = self.plan(&request)?;
        self.execute(&plan).await
    }

    /// Run a plan to completion and persist its report.
    ///
    /// An empty plan produces an empty report and is not persisted.
    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<RunReport> {
        let aggregator = Arc::new(Aggregator::new(plan));

        if plan.is_empty() {
            info!("Nothing to run for {} in {}", plan.identity, plan.project);
            return Ok(aggregator.finalize(self.settings.finalize_grace()).await?);
        }

        let pool = Arc::new(DriverPool::new(
            self.factory.clone(),
            plan.workers().min(plan.len()),
            self.settings.session_failure_threshold,
        ));
        let scheduler = Scheduler::new(pool.clone(), self.executor.clone(), self.settings.test_timeout())
            .with_cancellation(self.cancel.child_token());

        let stats = scheduler.run(plan, aggregator.clone()).await;
        pool.shutdown();
        pool.wait_closed().await;

        let report = aggregator.finalize(self.settings.finalize_grace()).await?;
        info!(
            dispatched = stats.dispatched,
            skipped = stats.skipped,
            passed = report.totals.passed,
            failed = report.totals.failed,
            error = report.totals.error,
            "Run {} finished in {} ms",
            report.timestamp,
            report.duration_ms
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.persist(&report) {
                warn!("Failed to persist report: {}", e);
                return Err(e.into());
            }
        }
        Ok(report)
    }
}
