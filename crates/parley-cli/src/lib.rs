//! # parley-cli
//!
//! The `parley` binary: discovers declarative test files, connects to the
//! gateway and runs the files against the bot under test.

pub mod gateway;
pub mod summary;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parley_core::{ConnectionGate, ExecutionReport, ParleyConfig, ReadFailure, Reader, TestExecutor};
use parley_proto::Transport;
use tracing::info;

use crate::summary::TerminalReporter;

/// Outcome of [`run_suite`].
#[derive(Debug)]
pub struct SuiteOutcome {
    pub report: ExecutionReport,
    /// Files skipped because they could not be read.
    pub unreadable: Vec<ReadFailure>,
}

impl SuiteOutcome {
    /// True when a test failed, a hook errored or a file was unreadable.
    pub fn failed(&self) -> bool {
        self.report.has_failures() || !self.unreadable.is_empty()
    }
}

/// Discovers and reads the configured test files, then runs them through a
/// fresh login/logout session on `transport`.
///
/// Relative test paths are resolved against `base`.
pub async fn run_suite(
    config: &ParleyConfig,
    base: &Path,
    transport: Arc<dyn Transport>,
    reporter: TerminalReporter,
) -> Result<SuiteOutcome> {
    let roots: Vec<_> = config.test_files.iter().map(|p| base.join(p)).collect();
    let paths = Reader::discover(&roots).context("Failed to discover test files")?;
    info!(files = paths.len(), "Reading test files");

    let reader = Reader::new(transport.clone(), config.channel())
        .exit_on_error(config.exit_on_file_reading_error);
    let (files, unreadable) = reader
        .read_files(&paths)
        .await
        .context("Failed to read test files")?;

    let gate = Arc::new(ConnectionGate::new(transport).with_login_timeout(config.login_timeout()));
    let executor =
        TestExecutor::new(gate, config.defaults()).with_progress(move |event| reporter.handle(event));
    let report = executor
        .run_session(files)
        .await
        .context("Test run aborted")?;

    Ok(SuiteOutcome { report, unreadable })
}
