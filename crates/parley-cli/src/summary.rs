//! Terminal output for runs.

use std::time::Duration;

use clap::ValueEnum;
use colored::Colorize;
use parley_core::{ExecutionReport, ProgressEvent, TestStatus};

/// Color output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Detect whether stdout is a terminal
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorMode {
    /// Applies the mode to every `colored` call in the process.
    pub fn apply(self) {
        match self {
            ColorMode::Always => colored::control::set_override(true),
            ColorMode::Never => colored::control::set_override(false),
            ColorMode::Auto => {
                use std::io::IsTerminal;
                if !std::io::stdout().is_terminal() {
                    colored::control::set_override(false);
                }
            }
        }
    }
}

/// Prints progress lines as the executor reports them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalReporter {
    quiet: bool,
}

impl TerminalReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn handle(&self, event: ProgressEvent) {
        if self.quiet {
            return;
        }
        match event {
            ProgressEvent::FileStarted { path, tests } => {
                println!(
                    "\n{} {}",
                    path.display().to_string().bold(),
                    format!("({} test{})", tests, plural(tests)).dimmed()
                );
            }
            ProgressEvent::TestStarted { .. } => {}
            ProgressEvent::TestCompleted(test) => {
                println!("  {}", test_line(&test.name, test.status, test.duration));
            }
            ProgressEvent::HookFailed(failure) => {
                println!(
                    "  {} {} hook: {}",
                    "!".yellow().bold(),
                    failure.phase,
                    failure.message.yellow()
                );
            }
            ProgressEvent::FileCompleted { .. } => {}
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn test_line(name: &str, status: TestStatus, duration: Duration) -> String {
    let timing = format!("({}ms)", duration.as_millis()).dimmed();
    match status {
        TestStatus::Passed => format!("{} {} {}", "✓".green(), name, timing),
        TestStatus::Failed => format!("{} {} {}", "✗".red(), name.red(), timing),
        TestStatus::NoAssertions => {
            format!("{} {} {}", "○".yellow(), name, "(no assertions)".yellow())
        }
        TestStatus::Skipped => format!("{} {}", "-".dimmed(), name.dimmed()),
        TestStatus::Pending => format!("{} {}", "?".dimmed(), name),
    }
}

/// Totals line plus hook error count and duration.
pub fn render_summary(report: &ExecutionReport) -> String {
    let mut parts = Vec::new();
    if report.total_tests_passed > 0 {
        parts.push(format!("{} passed", report.total_tests_passed).green().to_string());
    }
    if report.total_tests_failed > 0 {
        parts.push(format!("{} failed", report.total_tests_failed).red().to_string());
    }
    if report.total_tests_empty > 0 {
        parts.push(
            format!("{} without assertions", report.total_tests_empty)
                .yellow()
                .to_string(),
        );
    }
    if report.total_tests_skipped > 0 {
        parts.push(format!("{} skipped", report.total_tests_skipped).dimmed().to_string());
    }
    if parts.is_empty() {
        parts.push("no tests".dimmed().to_string());
    }

    let mut out = format!(
        "Tests: {} ({} total in {} file{})",
        parts.join(", "),
        report.total_tests(),
        report.total_files,
        plural(report.total_files)
    );
    if !report.hook_errors.is_empty() {
        out.push_str(&format!(
            "\nHooks: {}",
            format!(
                "{} error{}",
                report.hook_errors.len(),
                plural(report.hook_errors.len())
            )
            .red()
        ));
    }
    out.push_str(&format!(
        "\n{}",
        format!("Completed in {:.1}s", report.duration.as_secs_f64()).dimmed()
    ));
    out
}

/// Failed assertions with their expected/received lines and traces, then
/// hook errors and empty tests.
pub fn render_failures(report: &ExecutionReport) -> String {
    let mut out = String::new();
    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        out.push_str(&format!("{}\n", "Failed tests:".red().bold()));
        for (file, test) in failures {
            out.push_str(&format!(
                "\n  {} {} {}\n",
                "✗".red(),
                test.name.red().bold(),
                format!("({})", file.path.display()).dimmed()
            ));
            for verdict in test.failed_verdicts() {
                out.push_str(&format!("    {}\n", verdict.assertion().bold()));
                for line in verdict.message().lines() {
                    out.push_str(&format!("      {}\n", line));
                }
                if let Some(trace) = verdict.trace() {
                    out.push_str(&format!("      {}\n", format!("at {}", trace).dimmed()));
                }
            }
        }
    }

    if !report.hook_errors.is_empty() {
        out.push_str(&format!("\n{}\n", "Hook errors:".red().bold()));
        for failure in &report.hook_errors {
            let test = failure
                .test
                .as_deref()
                .map(|t| format!(" around '{}'", t))
                .unwrap_or_default();
            out.push_str(&format!(
                "  {} {}{}: {}\n",
                failure.file.display(),
                failure.phase,
                test,
                failure.message
            ));
        }
    }

    let empty: Vec<_> = report.empty_tests().collect();
    if !empty.is_empty() {
        out.push_str(&format!("\n{}\n", "Tests without assertions:".yellow()));
        for (file, test) in empty {
            out.push_str(&format!("  {} ({})\n", test.name, file.path.display()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{FileReport, HookFailure, HookPhase, TestReport, Verdict};

    fn report() -> ExecutionReport {
        let mut report = ExecutionReport::new();
        report.record_file(FileReport {
            path: "roles.test.yml".into(),
            tests: vec![
                TestReport {
                    name: "roles > rename".to_string(),
                    status: TestStatus::Failed,
                    verdicts: vec![
                        Verdict::report(
                            "to_rename_role",
                            "role 'Member' not to be renamed to 'Admin'",
                            "role renamed to 'Admin'",
                        )
                        .with_trace("roles.test.yml"),
                    ],
                    duration: Duration::from_millis(120),
                },
                TestReport {
                    name: "roles > empty".to_string(),
                    status: TestStatus::NoAssertions,
                    verdicts: Vec::new(),
                    duration: Duration::from_millis(1),
                },
            ],
            duration: Duration::from_millis(150),
        });
        report.record_hook_failure(HookFailure {
            file: "roles.test.yml".into(),
            phase: HookPhase::AfterEach,
            test: Some("roles > rename".to_string()),
            message: "hook #0 failed: cleanup".to_string(),
        });
        report
    }

    #[test]
    fn test_summary_lists_totals() {
        colored::control::set_override(false);
        let summary = render_summary(&report());
        assert!(summary.starts_with(
            "Tests: 1 failed, 1 without assertions (2 total in 1 file)"
        ));
        assert!(summary.contains("Hooks: 1 error"));
    }

    #[test]
    fn test_failures_show_expected_and_received() {
        colored::control::set_override(false);
        let text = render_failures(&report());
        assert!(text.contains("✗ roles > rename (roles.test.yml)"));
        assert!(text.contains("expected: role 'Member' not to be renamed to 'Admin'"));
        assert!(text.contains("received: role renamed to 'Admin'"));
        assert!(text.contains("at roles.test.yml"));
        assert!(text.contains("after_each around 'roles > rename': hook #0 failed: cleanup"));
        assert!(text.contains("roles > empty (roles.test.yml)"));
    }

    #[test]
    fn test_empty_report_has_no_failures_section() {
        colored::control::set_override(false);
        let report = ExecutionReport::new();
        assert!(render_failures(&report).is_empty());
        assert!(render_summary(&report).starts_with("Tests: no tests (0 total in 0 files)"));
    }
}
