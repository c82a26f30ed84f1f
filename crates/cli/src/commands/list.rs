//! List Commands

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use golem_core::{Catalog, FsCatalog, Settings};

use crate::output::{print_json, print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct ListArgs {
    /// Project to list suites and test cases of; all projects when omitted
    pub project: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectRow {
    pub name: String,
    pub suites: usize,
    pub tests: usize,
}

impl TableDisplay for ProjectRow {
    fn headers() -> Vec<&'static str> {
        vec!["Project", "Suites", "Tests"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.suites.to_string(),
            self.tests.to_string(),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct EntryRow {
    pub kind: &'static str,
    pub name: String,
}

impl TableDisplay for EntryRow {
    fn headers() -> Vec<&'static str> {
        vec!["Kind", "Name"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.kind.to_string(), self.name.clone()]
    }
}

/// Catalog for `project`, honouring its configured test extension
pub fn project_catalog(root: &Path, project: Option<&str>) -> Result<FsCatalog> {
    let settings = Settings::load(root, project)?;
    Ok(FsCatalog::new(root, settings.test_extension))
}

pub fn project_rows(root: &Path) -> Result<Vec<ProjectRow>> {
    let catalog = project_catalog(root, None)?;
    let mut rows = Vec::new();
    for name in catalog.list_projects()? {
        let catalog = project_catalog(root, Some(&name))?;
        rows.push(ProjectRow {
            suites: catalog.list_suites(&name)?.len(),
            tests: catalog.list_test_cases(&name)?.len(),
            name,
        });
    }
    Ok(rows)
}

pub fn entry_rows(catalog: &dyn Catalog, project: &str) -> Result<Vec<EntryRow>> {
    let suites = catalog.list_suites(project)?.into_iter().map(|name| EntryRow {
        kind: "suite",
        name,
    });
    let tests = catalog
        .list_test_cases(project)?
        .into_iter()
        .map(|test| EntryRow {
            kind: "test",
            name: test.to_string(),
        });
    Ok(suites.chain(tests).collect())
}

pub fn execute(args: ListArgs, root: &Path, format: OutputFormat) -> Result<()> {
    let Some(project) = args.project else {
        let rows = project_rows(root)?;
        print_list(&rows, format, "No projects found.");
        return Ok(());
    };

    let catalog = project_catalog(root, Some(&project))?;
    if !catalog.project_exists(&project)? {
        anyhow::bail!("the project {} does not exist", project);
    }

    let rows = entry_rows(&catalog, &project)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "project": project,
            "entries": rows,
        })),
        OutputFormat::Table => print_list(&rows, format, "No suites or test cases."),
    }
    Ok(())
}
