//! Golem settings
//!
//! Global settings live in `<root>/golem.toml`; a project may override any key
//! in `<root>/projects/<project>/settings.toml`. Missing files fall back to
//! defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::DriverKind;

pub const GLOBAL_SETTINGS_FILE: &str = "golem.toml";
pub const PROJECT_SETTINGS_FILE: &str = "settings.toml";

/// Run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Driver used when neither the command line nor the suite names one
    pub default_driver: DriverKind,

    /// File extension of test case files
    pub test_extension: String,

    /// Command running one test case; `{test}`, `{driver}` and `{endpoint}`
    /// are substituted
    pub test_command: Vec<String>,

    /// Upper bound on a single test case execution
    pub test_timeout_secs: u64,

    /// Consecutive launch failures after which a driver kind is given up
    pub session_failure_threshold: usize,

    /// How long the final report waits for straggling outcomes
    pub finalize_grace_secs: u64,

    /// Exported to every test process
    pub environment: BTreeMap<String, String>,

    /// Per driver kind settings, keyed by kind name
    pub drivers: BTreeMap<String, DriverSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_driver: DriverKind::Chrome,
            test_extension: "js".to_string(),
            test_command: vec!["node".to_string(), "{test}".to_string()],
            test_timeout_secs: 300,
            session_failure_threshold: 3,
            finalize_grace_secs: 30,
            environment: BTreeMap::new(),
            drivers: BTreeMap::new(),
        }
    }
}

/// WebDriver server settings for one driver kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Path to the driver binary (None = look up on PATH)
    pub binary: Option<PathBuf>,

    /// Extra arguments passed to the driver
    pub args: Vec<String>,

    /// Timeout for the driver to answer `/status`
    pub startup_timeout_secs: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            binary: None,
            args: Vec::new(),
            startup_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load global settings merged with the project's overrides
    pub fn load(root: &Path, project: Option<&str>) -> Result<Self, ConfigError> {
        let mut merged = read_table(&root.join(GLOBAL_SETTINGS_FILE))?;

        if let Some(project) = project {
            let path = root
                .join("projects")
                .join(project)
                .join(PROJECT_SETTINGS_FILE);
            merge_tables(&mut merged, read_table(&path)?);
        }

        let settings: Self = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.test_command.is_empty() {
            return Err(ConfigError::Invalid("test_command must not be empty".into()));
        }
        if self.session_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "session_failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Settings for a driver kind, defaults if not configured
    pub fn driver(&self, kind: DriverKind) -> DriverSettings {
        self.drivers.get(kind.as_str()).cloned().unwrap_or_default()
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn finalize_grace(&self) -> Duration {
        Duration::from_secs(self.finalize_grace_secs)
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    if !path.exists() {
        return Ok(toml::Table::new());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Deep-merge `overrides` into `base`; nested tables merge key by key
fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
