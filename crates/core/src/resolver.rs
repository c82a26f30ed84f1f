//! Target resolution
//!
//! A target names a declared suite, a directory of the test tree, or a single
//! test case. When names collide the first match in that order wins.

use tracing::debug;

use crate::catalog::{normalize_target, Catalog, DeclaredSuite, SuiteConfig};
use crate::error::ResolveError;
use crate::model::{TargetKind, TestCase};

/// What a target resolved to, with its test cases in run order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    DeclaredSuite(DeclaredSuite),
    DirectorySuite {
        directory: String,
        tests: Vec<TestCase>,
    },
    SingleTest(TestCase),
}

impl Resolution {
    pub fn kind(&self) -> TargetKind {
        match self {
            Resolution::DeclaredSuite(_) => TargetKind::Suite,
            Resolution::DirectorySuite { .. } => TargetKind::DirectorySuite,
            Resolution::SingleTest(_) => TargetKind::SingleTest,
        }
    }

    /// Suite name, directory or test path this resolution stands for
    pub fn identity(&self) -> String {
        match self {
            Resolution::DeclaredSuite(suite) => suite.name.clone(),
            Resolution::DirectorySuite { directory, .. } => directory.clone(),
            Resolution::SingleTest(test) => test.to_string(),
        }
    }

    pub fn tests(&self) -> &[TestCase] {
        match self {
            Resolution::DeclaredSuite(suite) => &suite.tests,
            Resolution::DirectorySuite { tests, .. } => tests,
            Resolution::SingleTest(test) => std::slice::from_ref(test),
        }
    }

    /// Stored configuration; only declared suites carry one
    pub fn suite_config(&self) -> Option<&SuiteConfig> {
        match self {
            Resolution::DeclaredSuite(suite) => Some(&suite.config),
            _ => None,
        }
    }
}

/// Resolve `target` inside `project`.
///
/// Order: declared suite, then directory, then test case.
pub fn resolve(
    catalog: &dyn Catalog,
    project: &str,
    target: &str,
) -> Result<Resolution, ResolveError> {
    if !catalog.project_exists(project)? {
        return Err(ResolveError::ProjectNotFound(project.to_string()));
    }

    let raw = target.trim();
    if !raw.is_empty() && catalog.suite_exists(project, raw)? {
        debug!(project, target = raw, "Resolved declared suite");
        return Ok(Resolution::DeclaredSuite(catalog.load_suite(project, raw)?));
    }

    let dotted = normalize_target(raw, catalog.test_extension());

    if catalog.is_directory_suite(project, &dotted)? {
        let tests: Vec<TestCase> = catalog
            .list_test_cases(project)?
            .into_iter()
            .filter(|t| t.is_under(&dotted))
            .collect();
        debug!(project, directory = %dotted, tests = tests.len(), "Resolved directory suite");
        return Ok(Resolution::DirectorySuite {
            directory: dotted,
            tests,
        });
    }

    if catalog.test_case_exists(project, &dotted)? {
        debug!(project, test = %dotted, "Resolved single test");
        return Ok(Resolution::SingleTest(TestCase::new(dotted)));
    }

    Err(ResolveError::TargetNotFound {
        target: target.to_string(),
        suites: catalog.list_suites(project)?,
        tests: catalog
            .list_test_cases(project)?
            .into_iter()
            .map(|t| t.to_string())
            .collect(),
    })
}
