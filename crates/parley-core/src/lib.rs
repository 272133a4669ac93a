//! # parley-core
//!
//! Event-correlated assertions and sequential test orchestration for chat
//! bots.
//!
//! An assertion sends a command to the bot under test and races the shared
//! event stream against a deadline, looking for the occurrence the command
//! should cause (a reply, a pin, a reaction, a role update).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐     ┌──────────────┐     ┌─────────────────┐
//! │ ConnectionGate │────▶│ TestExecutor │────▶│ AssertionEngine │
//! └────────────────┘     └──────────────┘     └─────────────────┘
//!                               │                      │
//!                               ▼                      ▼
//!                        ┌─────────────┐        ┌─────────────┐
//!                        │  HookQueue  │        │ EventWaiter │
//!                        └─────────────┘        └─────────────┘
//! ```
//!
//! Tests within a file, and files within a run, execute strictly one at a
//! time: every assertion reads from the same event stream.

pub mod assertion;
mod collector;
pub mod config;
mod executor;
mod expect;
mod gate;
mod hooks;
mod model;
pub mod reader;
mod report;
pub mod testing;
mod verdict;
mod waiter;

pub use assertion::{AssertionContext, AssertionEngine, Comparison, Matcher, Predicate};
pub use collector::Collector;
pub use config::{AssertionDefaults, ConfigError, ParleyConfig};
pub use executor::{ExecutorError, ProgressCallback, ProgressEvent, TestExecutor};
pub use expect::{Expectation, TestScope};
pub use gate::{ConnectionGate, GateError, GateState};
pub use hooks::{HookError, HookQueue, HookUnit};
pub use model::{Suite, SuiteId, Test, TestBody, TestFile, TestStatus};
pub use reader::{ReadFailure, Reader, ReaderError};
pub use report::{ExecutionReport, FileReport, HookFailure, HookPhase, TestReport};
pub use verdict::Verdict;
pub use waiter::{EventWaiter, WaitError};

/// Library version, matching the crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
