//! The outcome of a single assertion.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable pass/fail result of one assertion invocation.
///
/// Failure messages follow a fixed two-line template, an `expected: …` line
/// followed by a `received: …` line (see [`Verdict::report`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    assertion: String,
    pass: bool,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

impl Verdict {
    /// A passing verdict.
    pub fn pass(assertion: impl Into<String>) -> Self {
        Self {
            assertion: assertion.into(),
            pass: true,
            message: String::new(),
            trace: None,
        }
    }

    /// A failing verdict carrying a free-form message.
    pub fn fail(assertion: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            assertion: assertion.into(),
            pass: false,
            message: message.into(),
            trace: None,
        }
    }

    /// A failing verdict built from the expected/received template.
    pub fn report(
        assertion: impl Into<String>,
        expected: impl fmt::Display,
        received: impl fmt::Display,
    ) -> Self {
        Self::fail(assertion, report(expected, received))
    }

    /// Attaches the location the assertion was declared at.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn assertion(&self) -> &str {
        &self.assertion
    }

    pub fn passed(&self) -> bool {
        self.pass
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pass {
            return write!(f, "{}: passed", self.assertion);
        }
        write!(f, "{}: failed", self.assertion)?;
        if !self.message.is_empty() {
            write!(f, "\n{}", self.message)?;
        }
        if let Some(trace) = &self.trace {
            write!(f, "\n  at {}", trace)?;
        }
        Ok(())
    }
}

/// Formats the expected/received failure template.
pub fn report(expected: impl fmt::Display, received: impl fmt::Display) -> String {
    format!("expected: {}\nreceived: {}", expected, received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_template() {
        let verdict = Verdict::report("to_pin", "pin message with id 1", "nothing");
        assert!(!verdict.passed());
        assert_eq!(
            verdict.message(),
            "expected: pin message with id 1\nreceived: nothing"
        );
    }

    #[test]
    fn test_display_includes_trace() {
        let verdict = Verdict::fail("to_return", "boom").with_trace("tests/ping.rs:10:5");
        let text = verdict.to_string();
        assert!(text.starts_with("to_return: failed"));
        assert!(text.ends_with("at tests/ping.rs:10:5"));
    }

    #[test]
    fn test_pass_has_empty_message() {
        let verdict = Verdict::pass("to_unpin");
        assert!(verdict.passed());
        assert!(verdict.message().is_empty());
        assert!(verdict.trace().is_none());
    }
}
