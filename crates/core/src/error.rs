//! Error types for Golem runs

use std::path::PathBuf;

use thiserror::Error;

use crate::model::DriverKind;

/// Result type alias using the Golem error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop a run before or after execution.
///
/// Per-item failures (session launch, test execution) never end up here;
/// they are recorded as outcomes instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reading the project tree
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Suite {suite} could not be parsed: {source}")]
    SuiteParse {
        suite: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Suite {suite} references unknown test case {test}")]
    UnknownSuiteTest { suite: String, test: String },

    #[error("Suite not found: {0}")]
    SuiteNotFound(String),
}

/// Target could not be mapped to anything runnable
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Error: the project {0} does not exist")]
    ProjectNotFound(String),

    #[error("Error: the value {target} does not match an existing suite or test")]
    TargetNotFound {
        target: String,
        suites: Vec<String>,
        tests: Vec<String>,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Driver session acquisition failures
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Failed to launch {kind} session: {reason}")]
    Launch { kind: DriverKind, reason: String },

    #[error("Driver {kind} is unavailable after {failures} consecutive launch failures")]
    Unavailable { kind: DriverKind, failures: usize },

    #[error("Driver pool is shut down")]
    Closed,
}

/// Failures of the execution primitive
#[derive(Error, Debug)]
pub enum ExecError {
    /// The session stopped answering; it is not handed out again.
    #[error("Driver communication error: {0}")]
    Driver(String),

    #[error("Failed to start test process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Test case file not found: {0}")]
    MissingTestFile(PathBuf),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecError {
    /// Whether the session used for the failed call must be thrown away
    pub fn poisons_session(&self) -> bool {
        matches!(self, ExecError::Driver(_))
    }
}

/// Defects in outcome bookkeeping, reported apart from test failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("Outcome for {0} was recorded twice")]
    Duplicate(String),

    #[error("Outcome for {0} does not belong to this run")]
    Unexpected(String),

    #[error("Timed out after {waited_ms} ms waiting for {} outcome(s): {}", missing.len(), missing.join(", "))]
    Timeout { waited_ms: u64, missing: Vec<String> },
}

/// Settings loading failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Report persistence failures
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid {field} for a report path: {value:?}")]
    InvalidPathComponent { field: &'static str, value: String },
}
