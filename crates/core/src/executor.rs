//! Test case execution primitive

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::catalog::FsCatalog;
use crate::error::ExecError;
use crate::model::WorkItem;
use crate::pool::DriverSession;

/// Keep this much of the tail of the test output in the report
const OUTPUT_TAIL_BYTES: usize = 8 * 1024;

/// Result of running one test case to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub passed: bool,
    pub detail: Option<String>,
    pub output: Option<String>,
}

impl Execution {
    pub fn passed() -> Self {
        Self {
            passed: true,
            detail: None,
            output: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: Some(detail.into()),
            output: None,
        }
    }
}

/// Runs one test case against one driver session
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        item: &WorkItem,
        session: &dyn DriverSession,
    ) -> Result<Execution, ExecError>;
}

/// Runs each test case as a child process.
///
/// The command comes from the `test_command` setting; the driver endpoint and
/// run identity are passed through the environment so the test script can
/// attach to the session.
pub struct CommandExecutor {
    catalog: FsCatalog,
    command: Vec<String>,
}

impl CommandExecutor {
    pub fn new(catalog: FsCatalog, command: Vec<String>) -> Self {
        Self { catalog, command }
    }

    fn test_path(&self, item: &WorkItem) -> PathBuf {
        self.catalog.test_case_path(&item.project, item.test())
    }

    /// Command line for the item, placeholders substituted
    pub fn command_line(&self, item: &WorkItem, session: &dyn DriverSession) -> Vec<String> {
        let test_path = self.test_path(item);
        let test_path = test_path.to_string_lossy();
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{test}", &test_path)
                    .replace("{driver}", session.kind().as_str())
                    .replace("{endpoint}", session.endpoint())
            })
            .collect()
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(
        &self,
        item: &WorkItem,
        session: &dyn DriverSession,
    ) -> Result<Execution, ExecError> {
        let test_path = self.test_path(item);
        if !test_path.is_file() {
            return Err(ExecError::MissingTestFile(test_path));
        }

        let argv = self.command_line(item, session);
        let Some((program, args)) = argv.split_first() else {
            return Err(ExecError::Internal("empty test command".into()));
        };

        debug!(item = %item.id, "Running: {}", argv.join(" "));
        let start = Instant::now();

        let output = Command::new(program)
            .args(args)
            .current_dir(self.catalog.project_dir(&item.project))
            .envs(&item.environment)
            .env("GOLEM_PROJECT", &item.project)
            .env("GOLEM_TEST", item.test().as_str())
            .env("GOLEM_DRIVER", session.kind().as_str())
            .env("GOLEM_DRIVER_URL", session.endpoint())
            .env("GOLEM_TIMESTAMP", &item.timestamp)
            .stdin(Stdio::null())
            // The scheduler's timeout drops this future; take the child with it
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
            (true, true) => None,
            (false, true) => Some(stdout.to_string()),
            (true, false) => Some(stderr.to_string()),
            (false, false) => Some(format!("{}\n{}", stdout, stderr)),
        };

        debug!(
            item = %item.id,
            status = ?output.status.code(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Test process exited"
        );

        if output.status.success() {
            return Ok(Execution {
                passed: true,
                detail: None,
                output: combined.map(|o| tail(&o, OUTPUT_TAIL_BYTES)),
            });
        }

        let detail = match output.status.code() {
            Some(code) => format!("test exited with status {}", code),
            None => "test terminated by signal".to_string(),
        };
        let last_line = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| format!("{}: {}", detail, l.trim()));

        Ok(Execution {
            passed: false,
            detail: Some(last_line.unwrap_or(detail)),
            output: combined.map(|o| tail(&o, OUTPUT_TAIL_BYTES)),
        })
    }
}

/// Last `max` bytes of `text`, cut on a char boundary
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
