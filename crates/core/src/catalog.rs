//! Read-only view of the on-disk project tree
//!
//! ```text
//! <root>/projects/<project>/
//!     tests/<dir>/.../<name>.<ext>   test cases
//!     suites/<name>.yaml             declared suites
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::CatalogError;
use crate::model::{DriverKind, TestCase};

pub const PROJECTS_DIR: &str = "projects";
pub const TESTS_DIR: &str = "tests";
pub const SUITES_DIR: &str = "suites";

/// Configuration stored alongside a declared suite
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    #[serde(alias = "browsers")]
    pub drivers: Vec<DriverKind>,

    #[serde(alias = "workers")]
    pub threads: Option<usize>,

    pub environment: BTreeMap<String, String>,
}

/// Suite file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SuiteFile {
    /// Test paths; `dir.*` selects a whole directory, `*` every test
    tests: Vec<String>,

    #[serde(flatten)]
    config: SuiteConfig,
}

/// A named, ordered list of test cases plus its stored configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSuite {
    pub name: String,
    pub tests: Vec<TestCase>,
    pub config: SuiteConfig,
}

/// Catalog queries the resolver relies on
pub trait Catalog: Send + Sync {
    fn list_projects(&self) -> Result<Vec<String>, CatalogError>;

    /// Extension of test case files, used to accept `dir/test.<ext>` targets
    fn test_extension(&self) -> &str {
        ""
    }

    fn project_exists(&self, project: &str) -> Result<bool, CatalogError> {
        Ok(self.list_projects()?.iter().any(|p| p == project))
    }

    fn list_suites(&self, project: &str) -> Result<Vec<String>, CatalogError>;

    /// Every test case of the project, in path order
    fn list_test_cases(&self, project: &str) -> Result<Vec<TestCase>, CatalogError>;

    fn suite_exists(&self, project: &str, suite: &str) -> Result<bool, CatalogError> {
        Ok(self.list_suites(project)?.iter().any(|s| s == suite))
    }

    fn test_case_exists(&self, project: &str, test: &str) -> Result<bool, CatalogError> {
        Ok(self
            .list_test_cases(project)?
            .iter()
            .any(|t| t.as_str() == test))
    }

    /// Whether `directory` (dotted) is a directory of the test tree
    fn is_directory_suite(&self, project: &str, directory: &str) -> Result<bool, CatalogError>;

    fn load_suite(&self, project: &str, suite: &str) -> Result<DeclaredSuite, CatalogError>;
}

/// Catalog backed by the filesystem
#[derive(Debug, Clone)]
pub struct FsCatalog {
    root: PathBuf,
    extension: String,
}

impl FsCatalog {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(PROJECTS_DIR).join(project)
    }

    pub fn tests_dir(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(TESTS_DIR)
    }

    pub fn suites_dir(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(SUITES_DIR)
    }

    /// File backing a test case
    pub fn test_case_path(&self, project: &str, test: &TestCase) -> PathBuf {
        let mut path = self.tests_dir(project);
        for segment in test.segments() {
            path.push(segment);
        }
        path.set_extension(&self.extension);
        path
    }

    fn suite_path(&self, project: &str, suite: &str) -> Option<PathBuf> {
        let mut base = self.suites_dir(project);
        for segment in suite.split('.') {
            base.push(segment);
        }
        ["yaml", "yml"]
            .iter()
            .map(|ext| base.with_extension(ext))
            .find(|p| p.is_file())
    }

    /// Dotted names of files under `dir` accepted by `keep`, in path order
    fn walk_dotted(
        &self,
        dir: &Path,
        keep: impl Fn(&Path) -> bool,
    ) -> Result<Vec<TestCase>, CatalogError> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|source| CatalogError::Walk {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || !keep(path) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let relative = relative.with_extension("");
            let segments: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            if segments.iter().any(|s| is_hidden(s)) {
                continue;
            }
            found.push(TestCase::from_segments(segments));
        }
        found.sort();
        Ok(found)
    }

    /// Expand one suite entry into test cases
    fn expand_entry(
        &self,
        suite: &str,
        entry: &str,
        all: &[TestCase],
    ) -> Result<Vec<TestCase>, CatalogError> {
        let entry = normalize_target(entry, &self.extension);
        if entry == "*" {
            return Ok(all.to_vec());
        }
        if let Some(directory) = entry.strip_suffix(".*") {
            return Ok(all.iter().filter(|t| t.is_under(directory)).cloned().collect());
        }
        match all.iter().find(|t| t.as_str() == entry) {
            Some(test) => Ok(vec![test.clone()]),
            None => Err(CatalogError::UnknownSuiteTest {
                suite: suite.to_string(),
                test: entry,
            }),
        }
    }
}

impl Catalog for FsCatalog {
    fn test_extension(&self) -> &str {
        &self.extension
    }

    fn list_projects(&self) -> Result<Vec<String>, CatalogError> {
        let dir = self.root.join(PROJECTS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                if !is_hidden(&name) {
                    projects.push(name);
                }
            }
        }
        projects.sort();
        Ok(projects)
    }

    fn project_exists(&self, project: &str) -> Result<bool, CatalogError> {
        Ok(is_single_component(project) && !is_hidden(project) && self.project_dir(project).is_dir())
    }

    fn list_suites(&self, project: &str) -> Result<Vec<String>, CatalogError> {
        let suites = self.walk_dotted(&self.suites_dir(project), |p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })?;
        Ok(suites.into_iter().map(|t| t.as_str().to_string()).collect())
    }

    fn list_test_cases(&self, project: &str) -> Result<Vec<TestCase>, CatalogError> {
        let extension = self.extension.as_str();
        self.walk_dotted(&self.tests_dir(project), |p| {
            p.extension().map(|e| e == extension).unwrap_or(false)
        })
    }

    fn suite_exists(&self, project: &str, suite: &str) -> Result<bool, CatalogError> {
        if suite.is_empty() || suite.split('.').any(is_hidden) {
            return Ok(false);
        }
        Ok(self.suite_path(project, suite).is_some())
    }

    fn test_case_exists(&self, project: &str, test: &str) -> Result<bool, CatalogError> {
        if test.is_empty() || test.split('.').any(|s| s.is_empty() || is_hidden(s)) {
            return Ok(false);
        }
        Ok(self
            .test_case_path(project, &TestCase::new(test))
            .is_file())
    }

    fn is_directory_suite(&self, project: &str, directory: &str) -> Result<bool, CatalogError> {
        if directory.is_empty() || directory.split('.').any(|s| s.is_empty() || is_hidden(s)) {
            return Ok(false);
        }
        let mut path = self.tests_dir(project);
        for segment in directory.split('.') {
            path.push(segment);
        }
        Ok(path.is_dir())
    }

    fn load_suite(&self, project: &str, suite: &str) -> Result<DeclaredSuite, CatalogError> {
        let path = self
            .suite_path(project, suite)
            .ok_or_else(|| CatalogError::SuiteNotFound(suite.to_string()))?;
        let content = std::fs::read_to_string(&path)?;
        let file: SuiteFile = if content.trim().is_empty() {
            SuiteFile::default()
        } else {
            serde_yaml::from_str(&content).map_err(|source| CatalogError::SuiteParse {
                suite: suite.to_string(),
                source,
            })?
        };

        let all = self.list_test_cases(project)?;
        let mut seen = HashSet::new();
        let mut tests = Vec::new();
        for entry in &file.tests {
            for test in self.expand_entry(suite, entry, &all)? {
                if seen.insert(test.clone()) {
                    tests.push(test);
                }
            }
        }

        debug!(suite, tests = tests.len(), "Loaded suite");
        Ok(DeclaredSuite {
            name: suite.to_string(),
            tests,
            config: file.config,
        })
    }
}

fn is_hidden(segment: &str) -> bool {
    segment.starts_with('.') || segment.starts_with('_')
}

/// Whether `name` joins onto a directory as exactly one plain entry
pub fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    !name.contains(['/', '\\'])
        && matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
}

/// Turn a user-typed target into dotted form.
///
/// `login/forms/` → `login.forms`, `login/valid_user.js` → `login.valid_user`.
pub fn normalize_target(target: &str, extension: &str) -> String {
    let target = target.trim();
    let has_separator = target.contains('/') || target.contains('\\');
    let mut dotted = target.replace(['/', '\\'], ".");
    if has_separator && !extension.is_empty() {
        let suffix = format!(".{}", extension);
        if let Some(stripped) = dotted.strip_suffix(&suffix) {
            dotted = stripped.to_string();
        }
    }
    dotted.trim_matches('.').to_string()
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn demo() -> (TempDir, FsCatalog) {
        let tmp = TempDir::new().unwrap();
        fixture::project(
            tmp.path(),
            "demo",
            &[
                "login/valid_user.js",
                "login/invalid_user.js",
                "login/forms/reset.js",
                "cart/add.js",
                "home.js",
                "_helpers.js",
                "login/notes.txt",
            ],
            &[
                ("smoke", "tests: [login.valid_user, home]\ndrivers: [chrome]\nthreads: 2\n"),
                ("legacy", "tests: ['login.*']\nbrowsers: [firefox]\nworkers: 3\n"),
                ("everything", "tests: ['*', home]\n"),
                ("empty", ""),
                ("broken", "tests: [missing.test]\n"),
            ],
        );
        fixture::project(tmp.path(), "other", &["a.js"], &[]);
        let catalog = FsCatalog::new(tmp.path(), "js");
        (tmp, catalog)
    }

    #[test]
    fn test_list_projects_sorted() {
        let (_tmp, catalog) = demo();
        assert_eq!(catalog.list_projects().unwrap(), ["demo", "other"]);
        assert!(catalog.project_exists("demo").unwrap());
        assert!(!catalog.project_exists("nope").unwrap());
    }

    #[test]
    fn test_path_like_project_names_do_not_exist() {
        let (_tmp, catalog) = demo();
        for name in ["demo/tests", "demo/../other", "..", ".", "", "demo\\tests", "/demo"] {
            assert!(!catalog.project_exists(name).unwrap(), "{name:?}");
        }
        assert!(is_single_component("demo"));
        assert!(!is_single_component("demo/"));
    }

    #[test]
    fn test_list_test_cases_in_path_order() {
        let (_tmp, catalog) = demo();
        let tests: Vec<String> = catalog
            .list_test_cases("demo")
            .unwrap()
            .into_iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(
            tests,
            [
                "cart.add",
                "home",
                "login.forms.reset",
                "login.invalid_user",
                "login.valid_user",
            ]
        );
    }

    #[test]
    fn test_existence_queries() {
        let (_tmp, catalog) = demo();
        assert!(catalog.suite_exists("demo", "smoke").unwrap());
        assert!(!catalog.suite_exists("demo", "login").unwrap());
        assert!(catalog.test_case_exists("demo", "login.valid_user").unwrap());
        assert!(!catalog.test_case_exists("demo", "_helpers").unwrap());
        assert!(!catalog.test_case_exists("demo", "login").unwrap());
        assert!(catalog.is_directory_suite("demo", "login").unwrap());
        assert!(catalog.is_directory_suite("demo", "login.forms").unwrap());
        assert!(!catalog.is_directory_suite("demo", "home").unwrap());
    }

    #[test]
    fn test_load_suite_keeps_stored_order() {
        let (_tmp, catalog) = demo();
        let suite = catalog.load_suite("demo", "smoke").unwrap();
        let tests: Vec<&str> = suite.tests.iter().map(|t| t.as_str()).collect();
        assert_eq!(tests, ["login.valid_user", "home"]);
        assert_eq!(suite.config.drivers, [DriverKind::Chrome]);
        assert_eq!(suite.config.threads, Some(2));
    }

    #[test]
    fn test_load_suite_expands_wildcards_and_aliases() {
        let (_tmp, catalog) = demo();
        let legacy = catalog.load_suite("demo", "legacy").unwrap();
        assert_eq!(legacy.tests.len(), 3);
        assert_eq!(legacy.config.drivers, [DriverKind::Firefox]);
        assert_eq!(legacy.config.threads, Some(3));

        // `home` is already included by `*` and is not repeated
        let everything = catalog.load_suite("demo", "everything").unwrap();
        assert_eq!(everything.tests.len(), 5);
    }

    #[test]
    fn test_empty_suite_is_valid() {
        let (_tmp, catalog) = demo();
        let suite = catalog.load_suite("demo", "empty").unwrap();
        assert!(suite.tests.is_empty());
        assert_eq!(suite.config, SuiteConfig::default());
    }

    #[test]
    fn test_unknown_suite_entry_is_an_error() {
        let (_tmp, catalog) = demo();
        let err = catalog.load_suite("demo", "broken").unwrap_err();
        assert!(matches!(err, CatalogError::UnknownSuiteTest { ref test, .. } if test == "missing.test"));
    }

    #[test]
    fn test_normalize_target() {
        assert_eq!(normalize_target("login/", "js"), "login");
        assert_eq!(normalize_target("login/forms/reset.js", "js"), "login.forms.reset");
        assert_eq!(normalize_target("login.valid_user", "js"), "login.valid_user");
        assert_eq!(normalize_target("cart.*", "js"), "cart.*");
    }
}
