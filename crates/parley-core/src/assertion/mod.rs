//! The command-assertion protocol.
//!
//! Every assertion kind runs through the same state machine:
//!
//! ```text
//! Validating ──▶ StimulusSent ──▶ Correlating ──▶ Resolved(Pass | Fail)
//!     │               │
//!     └───────────────┴──────────────────────────▶ Resolved(Fail)
//! ```
//!
//! The kind-specific parts (parameter validation, which occurrence to wait
//! for, how to compare it and how to word the report) live behind the
//! [`Matcher`] trait. The [`AssertionEngine`] owns the shared policy: the
//! waiter is armed before the stimulus is sent, and negation is applied after
//! comparison with a timeout always counting as "not observed".

mod message;
mod reaction;
mod role;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_proto::{ChannelLocation, Embed, EventKind, Message, Occurrence, Transport};
use serde_json::Value;
use tracing::{debug, error};

use crate::verdict::{Verdict, report};
use crate::waiter::{EventWaiter, WaitError};

pub use message::{PinMatcher, ToEditMessage, ToReturn, ToReturnInChannel};
pub use reaction::ReactionMatcher;
pub use role::{RoleFlag, ToRenameRole, ToSetRoleFlag};

/// Default correlation window for an assertion.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Per-invocation settings of one assertion. Never shared between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionContext {
    /// Full stimulus, prefix included.
    pub command: String,
    pub is_not: bool,
    pub timeout: Duration,
    /// Where the stimulus is sent.
    pub channel: ChannelLocation,
    /// The bot under test. Occurrences caused by anyone else are ignored
    /// when set.
    pub bot_id: Option<String>,
}

impl AssertionContext {
    pub fn new(command: impl Into<String>, channel: ChannelLocation) -> Self {
        Self {
            command: command.into(),
            is_not: false,
            timeout: DEFAULT_TIMEOUT,
            channel,
            bot_id: None,
        }
    }

    pub fn negated(mut self, is_not: bool) -> Self {
        self.is_not = is_not;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bot(mut self, bot_id: impl Into<String>) -> Self {
        self.bot_id = Some(bot_id.into());
        self
    }

    pub fn guild_id(&self) -> Option<&str> {
        self.channel.guild_id.as_deref()
    }

    /// Returns true if `author` is the bot under test (or no bot is pinned).
    pub fn is_bot(&self, author: &str) -> bool {
        self.bot_id.as_deref().is_none_or(|bot| bot == author)
    }
}

/// Pure test applied to each occurrence of the subscribed kind.
pub type Predicate = Box<dyn Fn(&Occurrence) -> bool + Send + Sync>;

/// Result of comparing what was observed against what was expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub equal: bool,
    /// Human description of what was observed, used on the `received:` line.
    pub actual: String,
}

impl Comparison {
    pub fn new(equal: bool, actual: impl Into<String>) -> Self {
        Self {
            equal,
            actual: actual.into(),
        }
    }
}

/// The kind-specific half of an assertion.
#[async_trait]
pub trait Matcher: Send + Sync {
    /// Name reported on the verdict, e.g. `to_rename_role`.
    fn name(&self) -> &'static str;

    /// Checks parameter shape. The error is the complete failure message.
    fn validate(&mut self, ctx: &AssertionContext) -> Result<(), String>;

    /// Resolves anything needed before the stimulus (a role lookup).
    async fn prepare(
        &mut self,
        _transport: &dyn Transport,
        _ctx: &AssertionContext,
    ) -> Result<(), String> {
        Ok(())
    }

    fn event_kind(&self) -> EventKind;

    /// Builds the correlation predicate. `stimulus` is the sent command
    /// message as echoed back by the transport.
    fn predicate(&self, ctx: &AssertionContext, stimulus: &Message) -> Predicate;

    /// Whether the matched occurrences so far complete the wait.
    fn is_complete(&self, matched: &[Occurrence]) -> bool {
        !matched.is_empty()
    }

    fn compare(&self, matched: &[Occurrence]) -> Comparison;

    /// The `expected:` line. `negated` interpolates "not ".
    fn expectation(&self, negated: bool) -> String;

    /// What the waited-for occurrence is, for timeout reports.
    fn event_description(&self) -> String;
}

/// `"not "` when negated, nothing otherwise.
pub(crate) fn not(negated: bool) -> &'static str {
    if negated { "not " } else { "" }
}

/// Names the JSON type of a loosely-typed parameter.
pub(crate) fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Expected message content: a primitive compared against the text, or an
/// embed compared against the first embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Embed(Box<Embed>),
}

impl MessageContent {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Number(n) => Ok(Self::Text(n.to_string())),
            Value::Bool(b) => Ok(Self::Text(b.to_string())),
            Value::Object(_) => serde_json::from_value::<Embed>(value.clone())
                .map(|embed| Self::Embed(Box::new(embed)))
                .map_err(|e| report("content to be a valid embed", e)),
            other => Err(report(
                "content to be a primitive value or an embed object",
                type_of(other),
            )),
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Self::Text(text) => &message.content == text,
            Self::Embed(embed) => message.embed() == Some(embed),
        }
    }

    /// Describes `message` in the same shape as this expectation.
    pub fn describe(&self, message: &Message) -> String {
        match self {
            Self::Text(_) => format!("'{}'", message.content),
            Self::Embed(_) => match message.embed() {
                Some(embed) => serde_json::to_string(embed).unwrap_or_default(),
                None => format!("'{}' (no embed)", message.content),
            },
        }
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "'{}'", text),
            Self::Embed(embed) => {
                f.write_str(&serde_json::to_string(embed).map_err(|_| fmt::Error)?)
            }
        }
    }
}

/// Runs matchers against a transport.
#[derive(Clone)]
pub struct AssertionEngine {
    transport: Arc<dyn Transport>,
}

impl AssertionEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Runs one assertion to its verdict. Never fails: every error is
    /// recovered into a failing verdict.
    pub async fn run(&self, ctx: &AssertionContext, mut matcher: Box<dyn Matcher>) -> Verdict {
        let name = matcher.name();

        // Validating
        if ctx.timeout.is_zero() {
            return Verdict::report(name, "timeout to be greater than 0", "0ms");
        }
        if let Err(message) = matcher.validate(ctx) {
            debug!(assertion = name, "Assertion parameters rejected");
            return Verdict::fail(name, message);
        }
        if let Err(message) = matcher.prepare(self.transport.as_ref(), ctx).await {
            return Verdict::fail(name, message);
        }

        // The waiter must exist before the stimulus goes out.
        let waiter = EventWaiter::arm(self.transport.events(), matcher.event_kind(), ctx.timeout);

        // StimulusSent
        debug!(assertion = name, command = %ctx.command, channel = %ctx.channel, "Sending stimulus");
        let stimulus = match self.transport.send_message(&ctx.channel, &ctx.command).await {
            Ok(stimulus) => stimulus,
            Err(e) => {
                drop(waiter);
                return Verdict::fail(name, e.to_string());
            }
        };

        // Correlating
        let predicate = matcher.predicate(ctx, &stimulus);
        let outcome = waiter
            .gather(predicate, |matched| matcher.is_complete(matched))
            .await;

        // Resolved
        match outcome {
            Ok(matched) => {
                let comparison = matcher.compare(&matched);
                if ctx.is_not != comparison.equal {
                    Verdict::pass(name)
                } else {
                    Verdict::report(name, matcher.expectation(ctx.is_not), comparison.actual)
                }
            }
            Err(WaitError::Timeout { observed, .. }) => {
                if ctx.is_not {
                    return Verdict::pass(name);
                }
                let mut received = format!(
                    "{} did not occur within {}ms",
                    matcher.event_description(),
                    ctx.timeout.as_millis()
                );
                if !observed.is_empty() {
                    received.push_str(&format!(" (observed: {})", matcher.compare(&observed).actual));
                }
                Verdict::report(name, matcher.expectation(false), received)
            }
            Err(WaitError::Closed { .. }) => Verdict::report(
                name,
                matcher.expectation(ctx.is_not),
                "event stream closed before the occurrence was observed",
            ),
            Err(e @ WaitError::Release(_)) => {
                error!(assertion = name, error = %e, "Subscription lifecycle violated");
                Verdict::fail(name, e.to_string())
            }
        }
    }
}

impl fmt::Debug for AssertionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionEngine")
            .field("events", self.transport.events())
            .finish()
    }
}
