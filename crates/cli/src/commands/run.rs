//! Run Command

use std::path::Path;

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tracing::{debug, warn};

use golem_core::error::ResolveError;
use golem_core::plan::PlanSummary;
use golem_core::{DriverKind, Error, Orchestrator, RunReport, RunRequest, Status, WorkItem};

use super::list::{entry_rows, project_rows};
use crate::output::{
    print_error, print_info, print_json, print_list, print_success, print_warning, table,
    OutputFormat, TableDisplay,
};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Project name
    pub project: Option<String>,

    /// Suite, directory or test case to run
    pub test_or_suite: Option<String>,

    /// Number of parallel workers (0 or 1 runs sequentially)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Drivers to run against (chrome, firefox, edge, safari)
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    pub drivers: Vec<DriverKind>,

    /// Timestamp identifying this run; generated when omitted
    #[arg(long)]
    pub timestamp: Option<String>,

    /// Show the execution plan without running it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct OutcomeRow {
    pub test: String,
    pub driver: DriverKind,
    pub status: Status,
    pub duration_ms: u64,
    pub detail: String,
}

impl TableDisplay for OutcomeRow {
    fn headers() -> Vec<&'static str> {
        vec!["Test", "Driver", "Status", "Duration", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.test.clone(),
            self.driver.to_string(),
            self.status.to_string(),
            format!("{:.2}s", self.duration_ms as f64 / 1000.0),
            self.detail.clone(),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct PlanRow {
    pub seq: usize,
    pub test: String,
    pub driver: DriverKind,
}

impl From<&WorkItem> for PlanRow {
    fn from(item: &WorkItem) -> Self {
        Self {
            seq: item.seq,
            test: item.test().to_string(),
            driver: item.driver(),
        }
    }
}

impl TableDisplay for PlanRow {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Test", "Driver"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.seq.to_string(), self.test.clone(), self.driver.to_string()]
    }
}

pub async fn execute(args: RunArgs, root: &Path, format: OutputFormat) -> Result<()> {
    let Some(project) = args.project else {
        print_error("Usage: golem run <project> <test|suite>");
        let projects = project_rows(root)?;
        print_list(&projects, format, "No projects found.");
        bail!("a project name is required");
    };

    let orchestrator = Orchestrator::for_project(root, &project)?;

    let Some(target) = args.test_or_suite else {
        if !orchestrator.catalog().project_exists(&project)? {
            bail!("the project {} does not exist", project);
        }
        print_error(&format!("Usage: golem run {} <test|suite>", project));
        let entries = entry_rows(orchestrator.catalog(), &project)?;
        print_list(&entries, format, "No suites or test cases.");
        bail!("a test or suite name is required");
    };

    let request = RunRequest {
        project,
        target,
        threads: args.threads,
        drivers: args.drivers,
        timestamp: args.timestamp,
    };
    debug!(?request, "Run requested");

    let plan = match orchestrator.plan(&request) {
        Ok(plan) => plan,
        Err(Error::Resolve(ResolveError::TargetNotFound { target, suites, tests })) => {
            print_info("Suites:");
            for suite in &suites {
                println!("  {}", suite);
            }
            print_info("Test cases:");
            for test in &tests {
                println!("  {}", test);
            }
            bail!("the value {} does not match an existing suite or test", target);
        }
        Err(e) => return Err(e.into()),
    };

    if args.dry_run {
        let rows: Vec<PlanRow> = plan.items.iter().map(PlanRow::from).collect();
        match format {
            OutputFormat::Json => print_json(&DryRun {
                plan: plan.summary(),
                items: rows,
            }),
            OutputFormat::Table => {
                print_summary_header(&plan.summary());
                print_list(&rows, format, "Nothing to run.");
            }
        }
        return Ok(());
    }

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for running tests; the rest are skipped");
            cancel.cancel();
        }
    });

    let report = orchestrator.execute(&plan).await?;
    print_report(&report, format);
    Ok(())
}

#[derive(Serialize)]
struct DryRun {
    plan: PlanSummary,
    items: Vec<PlanRow>,
}

fn print_summary_header(summary: &PlanSummary) {
    let drivers: Vec<&str> = summary.drivers.iter().map(|d| d.as_str()).collect();
    println!(
        "{} {} ({}) in {}: {} item(s), {} thread(s), drivers [{}]",
        "Plan".bold(),
        summary.identity,
        summary.kind,
        summary.project,
        summary.items,
        summary.threads.max(1),
        drivers.join(", ")
    );
}

fn outcome_rows(report: &RunReport) -> Vec<OutcomeRow> {
    report
        .in_plan_order()
        .into_iter()
        .map(|o| OutcomeRow {
            test: o.id.test.to_string(),
            driver: o.id.driver,
            status: o.status,
            duration_ms: o.duration_ms,
            detail: o.detail.clone().unwrap_or_default(),
        })
        .collect()
}

fn print_report(report: &RunReport, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(report);
        return;
    }

    let rows = outcome_rows(report);
    if rows.is_empty() {
        println!("Nothing to run for {}.", report.identity);
        return;
    }
    println!("{}", table(&rows));

    let totals = report.totals;
    let mut parts = vec![format!("{} passed", totals.passed).green().to_string()];
    if totals.failed > 0 {
        parts.push(format!("{} failed", totals.failed).red().to_string());
    }
    if totals.error > 0 {
        parts.push(format!("{} error", totals.error).red().bold().to_string());
    }
    if totals.skipped > 0 {
        parts.push(format!("{} skipped", totals.skipped).yellow().to_string());
    }
    println!(
        "{} {} of {} in {:.2}s ({})",
        "Result:".bold(),
        parts.join(", "),
        totals.total,
        report.duration_ms as f64 / 1000.0,
        report.timestamp
    );

    if totals.skipped > 0 {
        print_warning("Run was cancelled before every test case started");
    } else if totals.all_passed() {
        print_success("All test cases passed");
    }
}
