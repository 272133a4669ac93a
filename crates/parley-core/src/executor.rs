//! Sequential execution of registered test files.
//!
//! Files run in the order given, tests in registration order, hooks around
//! them. Every assertion shares one event stream, so nothing here runs
//! concurrently.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::assertion::AssertionEngine;
use crate::config::AssertionDefaults;
use crate::expect::TestScope;
use crate::gate::{ConnectionGate, GateError};
use crate::hooks::{HookError, panic_message};
use crate::model::{TestFile, TestStatus};
use crate::report::{ExecutionReport, FileReport, HookFailure, HookPhase, TestReport};
use crate::verdict::Verdict;

/// Name of the verdict recorded when a test body returns an error or panics.
pub const BODY_VERDICT: &str = "test body";

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("could not establish a connection: {0}")]
    Gate(#[from] GateError),
}

/// Progress notifications for output sinks.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    FileStarted { path: PathBuf, tests: usize },
    TestStarted { name: String },
    TestCompleted(TestReport),
    HookFailed(HookFailure),
    FileCompleted { path: PathBuf, duration: Duration },
}

pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

pub struct TestExecutor {
    gate: Arc<ConnectionGate>,
    engine: AssertionEngine,
    defaults: Arc<AssertionDefaults>,
    on_progress: Option<ProgressCallback>,
}

impl TestExecutor {
    pub fn new(gate: Arc<ConnectionGate>, defaults: AssertionDefaults) -> Self {
        let engine = gate.engine();
        Self {
            gate,
            engine,
            defaults: Arc::new(defaults),
            on_progress: None,
        }
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn gate(&self) -> &Arc<ConnectionGate> {
        &self.gate
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.on_progress {
            callback(event);
        }
    }

    /// Logs in, runs `files`, then logs out even if the run failed.
    pub async fn run_session(&self, files: Vec<TestFile>) -> Result<ExecutionReport, ExecutorError> {
        self.gate.login().await?;
        let report = self.run(files).await;
        if let Err(e) = self.gate.logout().await {
            warn!(error = %e, "Logout failed");
        }
        Ok(report)
    }

    /// Runs every file in order and aggregates the outcome.
    ///
    /// Suspends until the gate is ready before the first hook runs.
    pub async fn run(&self, files: Vec<TestFile>) -> ExecutionReport {
        self.gate.wait_ready().await;

        let started = Instant::now();
        let mut report = ExecutionReport::new();
        for file in files {
            let file_report = self.run_file(file, &mut report).await;
            report.record_file(file_report);
        }
        report.duration = started.elapsed();

        info!(
            files = report.total_files,
            passed = report.total_tests_passed,
            failed = report.total_tests_failed,
            empty = report.total_tests_empty,
            skipped = report.total_tests_skipped,
            hook_errors = report.hook_errors.len(),
            "Run finished"
        );
        report
    }

    async fn run_file(&self, mut file: TestFile, report: &mut ExecutionReport) -> FileReport {
        let started = Instant::now();
        let path = file.path.clone();
        info!(file = %path.display(), tests = file.test_count(), "Running test file");
        self.emit(ProgressEvent::FileStarted {
            path: path.clone(),
            tests: file.test_count(),
        });

        let group_errors = std::mem::take(&mut file.group_errors);
        self.record_hooks(report, &path, HookPhase::Group, None, group_errors);

        let errors = file.before_all.drain().await;
        self.record_hooks(report, &path, HookPhase::BeforeAll, None, errors);

        let mut tests = Vec::with_capacity(file.test_count());
        for index in 0..file.tests.len() {
            let test_report = self.run_test(&mut file, index, report).await;
            self.emit(ProgressEvent::TestCompleted(test_report.clone()));
            tests.push(test_report);
        }

        let errors = file.after_all.drain().await;
        self.record_hooks(report, &path, HookPhase::AfterAll, None, errors);

        let duration = started.elapsed();
        self.emit(ProgressEvent::FileCompleted {
            path: path.clone(),
            duration,
        });
        FileReport {
            path,
            tests,
            duration,
        }
    }

    async fn run_test(
        &self,
        file: &mut TestFile,
        index: usize,
        report: &mut ExecutionReport,
    ) -> TestReport {
        let started = Instant::now();
        let name = file.full_name(&file.tests[index]);
        let path = file.path.clone();

        if file.tests[index].is_skipped() {
            info!(test = %name, "Skipping test");
            return TestReport {
                name,
                status: TestStatus::Skipped,
                verdicts: Vec::new(),
                duration: Duration::ZERO,
            };
        }

        let Some(body) = file.tests[index].take_body() else {
            warn!(test = %name, "Test body has already been run");
            let verdicts = vec![Verdict::fail(BODY_VERDICT, "test body has already been run")];
            let test = &mut file.tests[index];
            test.status = TestStatus::Failed;
            test.verdicts.clone_from(&verdicts);
            return TestReport {
                name,
                status: TestStatus::Failed,
                verdicts,
                duration: started.elapsed(),
            };
        };

        info!(test = %name, "Running test");
        self.emit(ProgressEvent::TestStarted { name: name.clone() });

        let suites = file.suite_path(file.tests[index].suite);

        // File hooks first, then suites from the outermost in.
        let mut errors = file.before_each.run_all().await;
        for &id in &suites {
            if let Some(suite) = file.suite_mut(id) {
                errors.extend(suite.before_each.run_all().await);
            }
        }
        self.record_hooks(report, &path, HookPhase::BeforeEach, Some(&name), errors);

        let scope = TestScope::new(self.engine.clone(), self.defaults.clone());
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| body(scope.clone()))) {
            Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(payload) => Err(panic_message(payload)),
            },
            Err(payload) => Err(panic_message(payload)),
        };
        let mut verdicts = scope.take_verdicts();
        if let Err(message) = outcome {
            warn!(test = %name, error = %message, "Test body failed");
            verdicts.push(Verdict::fail(BODY_VERDICT, message));
        }

        // Suites from the innermost out, then file hooks.
        let mut errors = Vec::new();
        for &id in suites.iter().rev() {
            if let Some(suite) = file.suite_mut(id) {
                errors.extend(suite.after_each.run_all().await);
            }
        }
        errors.extend(file.after_each.run_all().await);
        self.record_hooks(report, &path, HookPhase::AfterEach, Some(&name), errors);

        let status = TestStatus::from_verdicts(&verdicts);
        match status {
            TestStatus::Failed => warn!(test = %name, "Test failed"),
            TestStatus::NoAssertions => info!(test = %name, "Test resolved no assertions"),
            _ => info!(test = %name, status = %status, "Test finished"),
        }

        let test = &mut file.tests[index];
        test.status = status;
        test.verdicts.clone_from(&verdicts);

        TestReport {
            name,
            status,
            verdicts,
            duration: started.elapsed(),
        }
    }

    fn record_hooks(
        &self,
        report: &mut ExecutionReport,
        file: &std::path::Path,
        phase: HookPhase,
        test: Option<&str>,
        errors: Vec<HookError>,
    ) {
        for error in errors {
            let failure = HookFailure {
                file: file.to_path_buf(),
                phase,
                test: test.map(str::to_string),
                message: error.to_string(),
            };
            warn!(file = %file.display(), phase = %phase, error = %failure.message, "Hook error");
            self.emit(ProgressEvent::HookFailed(failure.clone()));
            report.record_hook_failure(failure);
        }
    }
}

impl std::fmt::Debug for TestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestExecutor")
            .field("gate", &self.gate)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;
    use crate::testing::MockTransport;
    use parley_proto::ChannelLocation;
    use std::sync::Mutex;

    fn defaults() -> AssertionDefaults {
        AssertionDefaults {
            bot_prefix: "!".to_string(),
            timeout: Duration::from_millis(200),
            channel: ChannelLocation::new("c").with_guild("g"),
            bot_id: Some("bot".to_string()),
        }
    }

    async fn ready_executor(mock: &MockTransport) -> TestExecutor {
        let gate = Arc::new(ConnectionGate::new(Arc::new(mock.clone())));
        gate.login().await.unwrap();
        TestExecutor::new(gate, defaults())
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn explode(message: &str) {
        panic!("{message}");
    }

    fn push(log: &Log, entry: &str) {
        log.lock().unwrap().push(entry.to_string());
    }

    #[tokio::test]
    async fn test_hooks_wrap_each_test_in_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let c = Collector::new("order.rs");
        let l = log.clone();
        c.before_all(move || {
            push(&l, "before_all");
            async { Ok(()) }
        });
        let l = log.clone();
        c.before_each(move || {
            push(&l, "file before_each");
            async { Ok(()) }
        });
        let l = log.clone();
        c.after_each(move || {
            push(&l, "file after_each");
            async { Ok(()) }
        });
        let l = log.clone();
        c.after_all(move || {
            push(&l, "after_all");
            async { Ok(()) }
        });
        let outer_log = log.clone();
        c.describe("outer", move |c| {
            let l = outer_log.clone();
            c.before_each(move || {
                push(&l, "outer before_each");
                async { Ok(()) }
            });
            let l = outer_log.clone();
            c.after_each(move || {
                push(&l, "outer after_each");
                async { Ok(()) }
            });
            let l = outer_log.clone();
            c.test("t", move |_| {
                push(&l, "body");
                async { Ok(()) }
            });
        });
        let file = c.finish().await;

        let executor = ready_executor(&MockTransport::new()).await;
        let report = executor.run(vec![file]).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "before_all",
                "file before_each",
                "outer before_each",
                "body",
                "outer after_each",
                "file after_each",
                "after_all",
            ]
        );
        assert_eq!(report.per_file[0].tests[0].name, "outer > t");
        assert_eq!(report.per_file[0].tests[0].status, TestStatus::NoAssertions);
        assert_eq!(report.total_tests_empty, 1);
    }

    #[tokio::test]
    async fn test_failing_body_and_hooks_do_not_abort() {
        let c = Collector::new("failing.rs");
        c.before_each(|| async { anyhow::bail!("setup broke") });
        c.test("errors", |_| async { anyhow::bail!("boom") });
        c.test("panics", |_| async {
            explode("kaboom");
            Ok(())
        });
        c.test("passes", |t| async move {
            t.expect("ping").to_return("pong").await;
            Ok(())
        });
        let file = c.finish().await;

        let mock = MockTransport::new();
        mock.reply("!ping", Duration::from_millis(10), "pong");
        let executor = ready_executor(&mock).await;
        let report = executor.run(vec![file]).await;

        let tests = &report.per_file[0].tests;
        assert_eq!(tests[0].status, TestStatus::Failed);
        assert_eq!(tests[0].verdicts[0].assertion(), BODY_VERDICT);
        assert_eq!(tests[0].verdicts[0].message(), "boom");
        assert_eq!(tests[1].verdicts[0].message(), "panicked: kaboom");
        assert_eq!(tests[2].status, TestStatus::Passed);
        assert_eq!(report.total_tests_failed, 2);
        assert_eq!(report.total_tests_passed, 1);
        assert_eq!(report.hook_errors.len(), 3);
        assert!(
            report
                .hook_errors
                .iter()
                .all(|h| h.phase == HookPhase::BeforeEach && h.message.contains("setup broke"))
        );
        assert_eq!(report.hook_errors[2].test.as_deref(), Some("passes"));
    }

    #[tokio::test]
    async fn test_skipped_tests_are_reported_not_run() {
        let c = Collector::new("skip.rs");
        c.skip("later");
        let file = c.finish().await;

        let executor = ready_executor(&MockTransport::new()).await;
        let report = executor.run(vec![file]).await;
        assert_eq!(report.total_tests_skipped, 1);
        assert_eq!(report.per_file[0].tests[0].duration, Duration::ZERO);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_progress_events_follow_execution() {
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let c = Collector::new("progress.rs");
        c.test("one", |_| async { Ok(()) });
        let file = c.finish().await;

        let sink = events.clone();
        let executor = ready_executor(&MockTransport::new())
            .await
            .with_progress(move |event| {
                let label = match event {
                    ProgressEvent::FileStarted { tests, .. } => format!("file {tests}"),
                    ProgressEvent::TestStarted { name } => format!("start {name}"),
                    ProgressEvent::TestCompleted(t) => format!("done {}", t.status),
                    ProgressEvent::HookFailed(_) => "hook".to_string(),
                    ProgressEvent::FileCompleted { .. } => "file done".to_string(),
                };
                sink.lock().unwrap().push(label);
            });
        executor.run(vec![file]).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["file 1", "start one", "done no assertions", "file done"]
        );
    }

    #[tokio::test]
    async fn test_run_session_logs_in_and_out() {
        let mock = MockTransport::new();
        let gate = Arc::new(ConnectionGate::new(Arc::new(mock.clone())));
        let executor = TestExecutor::new(gate.clone(), defaults());

        let report = executor.run_session(Vec::new()).await.unwrap();
        assert_eq!(report.total_files, 0);
        assert_eq!(mock.disconnect_count(), 1);
        assert!(!gate.state().is_logged_in);
    }

    #[tokio::test]
    async fn test_consumed_body_fails_without_aborting_run() {
        let c = Collector::new("rerun.rs");
        c.test("already ran", |_| async { Ok(()) });
        c.test("fresh", |_| async { Ok(()) });
        let mut file = c.finish().await;
        drop(file.tests[0].take_body());

        let executor = ready_executor(&MockTransport::new()).await;
        let report = executor.run(vec![file]).await;

        let tests = &report.per_file[0].tests;
        assert_eq!(tests[0].status, TestStatus::Failed);
        assert_eq!(tests[0].verdicts[0].assertion(), BODY_VERDICT);
        assert_eq!(tests[0].verdicts[0].message(), "test body has already been run");
        assert_eq!(tests[1].status, TestStatus::NoAssertions);
        assert_eq!(report.total_tests_failed, 1);
    }

    #[tokio::test]
    async fn test_run_session_disconnects_when_never_ready() {
        let mock = MockTransport::new().manual_ready();
        let gate = ConnectionGate::new(Arc::new(mock.clone()))
            .with_login_timeout(Some(Duration::from_millis(50)));
        let executor = TestExecutor::new(Arc::new(gate), defaults());

        let err = executor.run_session(Vec::new()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Gate(GateError::ReadyTimeout(_))));
        assert_eq!(mock.disconnect_count(), 1);
        assert!(!mock.is_connected());
        assert!(!executor.gate().state().is_logged_in);
    }

    #[tokio::test]
    async fn test_run_session_surfaces_connection_failure() {
        let mock = MockTransport::new();
        mock.fail_connect("refused");
        let gate = Arc::new(ConnectionGate::new(Arc::new(mock)));
        let executor = TestExecutor::new(gate, defaults());

        let err = executor.run_session(Vec::new()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Gate(_)));
    }
}
