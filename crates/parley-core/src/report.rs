//! Aggregated results of a run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::TestStatus;
use crate::verdict::Verdict;

/// Where a hook error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
    /// A deferred group callback during registration.
    Group,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPhase::BeforeAll => "before_all",
            HookPhase::AfterAll => "after_all",
            HookPhase::BeforeEach => "before_each",
            HookPhase::AfterEach => "after_each",
            HookPhase::Group => "group",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookFailure {
    pub file: PathBuf,
    pub phase: HookPhase,
    /// The test the hook ran around, for per-test hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// Full name, suites included.
    pub name: String,
    pub status: TestStatus,
    pub verdicts: Vec<Verdict>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl TestReport {
    pub fn failed_verdicts(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| !v.passed())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub tests: Vec<TestReport>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl FileReport {
    pub fn count(&self, status: TestStatus) -> usize {
        self.tests.iter().filter(|t| t.status == status).count()
    }
}

/// Totals and per-file results, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub total_files: usize,
    pub total_tests_passed: usize,
    pub total_tests_failed: usize,
    /// Tests that resolved no assertion.
    pub total_tests_empty: usize,
    pub total_tests_skipped: usize,
    pub total_assertions: usize,
    pub per_file: Vec<FileReport>,
    pub hook_errors: Vec<HookFailure>,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl Default for ExecutionReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionReport {
    pub fn new() -> Self {
        Self {
            total_files: 0,
            total_tests_passed: 0,
            total_tests_failed: 0,
            total_tests_empty: 0,
            total_tests_skipped: 0,
            total_assertions: 0,
            per_file: Vec::new(),
            hook_errors: Vec::new(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Adds a finished file to the totals.
    pub fn record_file(&mut self, file: FileReport) {
        self.total_files += 1;
        for test in &file.tests {
            self.total_assertions += test.verdicts.len();
            match test.status {
                TestStatus::Passed => self.total_tests_passed += 1,
                TestStatus::Failed => self.total_tests_failed += 1,
                TestStatus::NoAssertions => self.total_tests_empty += 1,
                TestStatus::Skipped => self.total_tests_skipped += 1,
                TestStatus::Pending => {}
            }
        }
        self.per_file.push(file);
    }

    pub fn record_hook_failure(&mut self, failure: HookFailure) {
        self.hook_errors.push(failure);
    }

    /// Every test across all files.
    pub fn total_tests(&self) -> usize {
        self.per_file.iter().map(|f| f.tests.len()).sum()
    }

    /// True when a test failed or a hook raised an error.
    pub fn has_failures(&self) -> bool {
        self.total_tests_failed > 0 || !self.hook_errors.is_empty()
    }

    /// Failed tests with the file they belong to.
    pub fn failures(&self) -> impl Iterator<Item = (&FileReport, &TestReport)> {
        self.per_file.iter().flat_map(|file| {
            file.tests
                .iter()
                .filter(|t| t.status == TestStatus::Failed)
                .map(move |t| (file, t))
        })
    }

    /// Tests that ran but resolved no assertion.
    pub fn empty_tests(&self) -> impl Iterator<Item = (&FileReport, &TestReport)> {
        self.per_file.iter().flat_map(|file| {
            file.tests
                .iter()
                .filter(|t| t.status == TestStatus::NoAssertions)
                .map(move |t| (file, t))
        })
    }
}

/// Durations as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test(name: &str, status: TestStatus, verdicts: Vec<Verdict>) -> TestReport {
        TestReport {
            name: name.to_string(),
            status,
            verdicts,
            duration: Duration::from_millis(3),
        }
    }

    #[test]
    fn test_totals_follow_statuses() {
        let mut report = ExecutionReport::new();
        report.record_file(FileReport {
            path: "a.test.yml".into(),
            tests: vec![
                test("ok", TestStatus::Passed, vec![Verdict::pass("to_return")]),
                test(
                    "bad",
                    TestStatus::Failed,
                    vec![Verdict::pass("to_pin"), Verdict::fail("to_return", "x")],
                ),
                test("empty", TestStatus::NoAssertions, vec![]),
                test("later", TestStatus::Skipped, vec![]),
            ],
            duration: Duration::from_millis(10),
        });

        assert_eq!(report.total_files, 1);
        assert_eq!(report.total_tests(), 4);
        assert_eq!(report.total_tests_passed, 1);
        assert_eq!(report.total_tests_failed, 1);
        assert_eq!(report.total_tests_empty, 1);
        assert_eq!(report.total_tests_skipped, 1);
        assert_eq!(report.total_assertions, 3);
        assert!(report.total_tests_passed + report.total_tests_failed <= report.total_assertions);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.empty_tests().count(), 1);
        assert!(report.has_failures());
    }

    #[test]
    fn test_hook_error_alone_is_a_failure() {
        let mut report = ExecutionReport::new();
        assert!(!report.has_failures());
        report.record_hook_failure(HookFailure {
            file: "a.test.yml".into(),
            phase: HookPhase::AfterAll,
            test: None,
            message: "cleanup failed".to_string(),
        });
        assert!(report.has_failures());
    }

    #[test]
    fn test_report_serializes_durations_as_millis() {
        let mut report = ExecutionReport::new();
        report.duration = Duration::from_millis(1500);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["total_files"], 0);

        let back: ExecutionReport = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
    }
}
