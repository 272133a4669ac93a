//! Test files, suites and tests as registered before a run.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::expect::TestScope;
use crate::hooks::{HookError, HookQueue};
use crate::verdict::Verdict;

/// Index of a suite within its [`TestFile`].
pub type SuiteId = usize;

/// The body of a test. Runs once, with a fresh scope that collects verdicts.
pub type TestBody = Box<dyn FnOnce(TestScope) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Outcome of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Passed,
    Failed,
    /// Ran to completion without resolving a single assertion.
    NoAssertions,
    Skipped,
}

impl TestStatus {
    /// Failed if any verdict failed, passed if there was at least one and
    /// all passed.
    pub fn from_verdicts(verdicts: &[Verdict]) -> Self {
        if verdicts.is_empty() {
            TestStatus::NoAssertions
        } else if verdicts.iter().all(Verdict::passed) {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestStatus::Pending => "pending",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::NoAssertions => "no assertions",
            TestStatus::Skipped => "skipped",
        })
    }
}

/// A named group of tests with its own per-test hooks.
#[derive(Debug)]
pub struct Suite {
    pub id: SuiteId,
    pub name: String,
    pub parent: Option<SuiteId>,
    pub before_each: HookQueue,
    pub after_each: HookQueue,
}

/// A registered test.
pub struct Test {
    pub name: String,
    pub suite: Option<SuiteId>,
    pub status: TestStatus,
    pub verdicts: Vec<Verdict>,
    body: Option<TestBody>,
}

impl Test {
    pub fn new<F, Fut>(name: impl Into<String>, suite: Option<SuiteId>, body: F) -> Self
    where
        F: FnOnce(TestScope) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            suite,
            status: TestStatus::Pending,
            verdicts: Vec::new(),
            body: Some(Box::new(move |scope| body(scope).boxed())),
        }
    }

    /// A test that is reported but never run.
    pub fn skipped(name: impl Into<String>, suite: Option<SuiteId>) -> Self {
        Self {
            name: name.into(),
            suite,
            status: TestStatus::Skipped,
            verdicts: Vec::new(),
            body: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == TestStatus::Skipped
    }

    /// Takes the body out; a test body runs at most once.
    pub(crate) fn take_body(&mut self) -> Option<TestBody> {
        self.body.take()
    }
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Test")
            .field("name", &self.name)
            .field("suite", &self.suite)
            .field("status", &self.status)
            .field("verdicts", &self.verdicts.len())
            .finish_non_exhaustive()
    }
}

/// Everything registered from one source file.
#[derive(Debug)]
pub struct TestFile {
    pub path: PathBuf,
    pub before_all: HookQueue,
    pub after_all: HookQueue,
    /// Per-test hooks outside any suite.
    pub before_each: HookQueue,
    pub after_each: HookQueue,
    pub suites: Vec<Suite>,
    pub tests: Vec<Test>,
    /// Errors raised by group callbacks while the file was registered.
    pub group_errors: Vec<HookError>,
}

impl TestFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            before_all: HookQueue::new(),
            after_all: HookQueue::new(),
            before_each: HookQueue::new(),
            after_each: HookQueue::new(),
            suites: Vec::new(),
            tests: Vec::new(),
            group_errors: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_suite(&mut self, name: impl Into<String>, parent: Option<SuiteId>) -> SuiteId {
        let id = self.suites.len();
        self.suites.push(Suite {
            id,
            name: name.into(),
            parent,
            before_each: HookQueue::new(),
            after_each: HookQueue::new(),
        });
        id
    }

    pub fn add_test(&mut self, test: Test) {
        self.tests.push(test);
    }

    pub fn suite_mut(&mut self, id: SuiteId) -> Option<&mut Suite> {
        self.suites.get_mut(id)
    }

    /// Suite ids from the outermost ancestor down to `suite`.
    pub fn suite_path(&self, suite: Option<SuiteId>) -> Vec<SuiteId> {
        let mut path = Vec::new();
        let mut current = suite;
        while let Some(id) = current {
            path.push(id);
            current = self.suites.get(id).and_then(|s| s.parent);
        }
        path.reverse();
        path
    }

    /// `outer > inner > test` naming for reports.
    pub fn full_name(&self, test: &Test) -> String {
        let mut parts: Vec<&str> = self
            .suite_path(test.suite)
            .into_iter()
            .filter_map(|id| self.suites.get(id).map(|s| s.name.as_str()))
            .collect();
        parts.push(&test.name);
        parts.join(" > ")
    }

    pub fn test_count(&self) -> usize {
        self.tests.len()
    }
}
