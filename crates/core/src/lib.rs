//! Golem run orchestration
//!
//! This crate turns a `project` + `test-or-suite` pair into a set of work
//! items and runs them against browser-driver sessions:
//! - Resolves the target against the on-disk catalog (suite, directory, test)
//! - Expands the resolution into a plan (test cases x driver kinds)
//! - Runs the plan on a bounded worker pool backed by a driver session pool
//! - Aggregates one outcome per work item into a timestamped report
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Orchestrator                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  resolver::resolve(catalog, project, target) -> Resolution  │
//! │  plan::build_plan(resolution, context) -> ExecutionPlan     │
//! │  Scheduler::run(plan, aggregator)                           │
//! │    ├── worker 1..N: dequeue -> acquire -> execute -> record │
//! │    ├── DriverPool (per driver kind, capped at N sessions)   │
//! │    └── Executor (runs one test case against one session)    │
//! │  Aggregator::finalize(timeout) -> RunReport                 │
//! │  ReportSink::persist(report)                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod aggregator;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod plan;
pub mod pool;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod webdriver;

pub use aggregator::Aggregator;
pub use catalog::{Catalog, FsCatalog};
pub use config::Settings;
pub use error::{Error, Result};
pub use executor::{CommandExecutor, Execution, Executor};
pub use model::{
    DriverKind, Outcome, RunContext, RunRequest, Status, TargetKind, TestCase, WorkItem,
    WorkItemId,
};
pub use orchestrator::Orchestrator;
pub use plan::{build_plan, ExecutionPlan};
pub use pool::{DriverPool, DriverSession, SessionFactory, SessionGuard};
pub use report::{JsonReportSink, ReportSink, RunReport, Totals};
pub use resolver::{resolve, Resolution};
pub use scheduler::{RunState, Scheduler};
pub use webdriver::WebDriverFactory;

/// Golem version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
