//! The assertion API available inside test bodies.
//!
//! ```ignore
//! collector.test("ping replies", |t| async move {
//!     t.expect("ping").to_return("pong").await;
//!     t.expect("promote").not().to_rename_role("Admin", "42").await;
//!     Ok(())
//! });
//! ```

use std::panic::Location;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use parley_proto::{ChannelLocation, Message, MessageIdentifier, RoleIdentifier, TransportResult};
use serde_json::Value;

use crate::assertion::{
    AssertionContext, AssertionEngine, Matcher, PinMatcher, ReactionMatcher, ToEditMessage,
    ToRenameRole, ToReturn, ToReturnInChannel, ToSetRoleFlag,
};
use crate::config::AssertionDefaults;
use crate::verdict::Verdict;

/// Per-test handle: builds expectations and collects their verdicts.
#[derive(Clone)]
pub struct TestScope {
    engine: AssertionEngine,
    defaults: Arc<AssertionDefaults>,
    verdicts: Arc<Mutex<Vec<Verdict>>>,
    trace: Option<Arc<str>>,
}

impl TestScope {
    pub fn new(engine: AssertionEngine, defaults: Arc<AssertionDefaults>) -> Self {
        Self {
            engine,
            defaults,
            verdicts: Arc::new(Mutex::new(Vec::new())),
            trace: None,
        }
    }

    /// Reports every verdict at `trace` instead of the calling location.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(Arc::from(trace.into()));
        self
    }

    /// Starts an assertion about what the bot does in response to `command`.
    /// The configured bot prefix is prepended.
    #[track_caller]
    pub fn expect(&self, command: impl AsRef<str>) -> Expectation {
        let trace = match &self.trace {
            Some(trace) => trace.to_string(),
            None => Location::caller().to_string(),
        };
        let ctx = AssertionContext {
            command: format!("{}{}", self.defaults.bot_prefix, command.as_ref()),
            is_not: false,
            timeout: self.defaults.timeout,
            channel: self.defaults.channel.clone(),
            bot_id: self.defaults.bot_id.clone(),
        };
        Expectation {
            scope: self.clone(),
            ctx,
            trace,
        }
    }

    /// Sends a plain message (no prefix) in the default channel.
    pub async fn send_message(&self, content: &str) -> TransportResult<Message> {
        self.send_message_in(&self.defaults.channel, content).await
    }

    pub async fn send_message_in(
        &self,
        channel: &ChannelLocation,
        content: &str,
    ) -> TransportResult<Message> {
        self.engine.transport().send_message(channel, content).await
    }

    pub fn defaults(&self) -> &AssertionDefaults {
        &self.defaults
    }

    /// Verdicts recorded so far, in resolution order.
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.lock().clone()
    }

    pub(crate) fn take_verdicts(&self) -> Vec<Verdict> {
        std::mem::take(&mut *self.lock())
    }

    pub(crate) fn record(&self, verdict: Verdict) {
        self.lock().push(verdict);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Verdict>> {
        self.verdicts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestScope")
            .field("defaults", &self.defaults)
            .field("verdicts", &self.lock().len())
            .finish_non_exhaustive()
    }
}

/// One pending assertion. Consumed by the terminal `to_*` call.
#[must_use = "an expectation does nothing until a to_* method is awaited"]
#[derive(Debug)]
pub struct Expectation {
    scope: TestScope,
    ctx: AssertionContext,
    trace: String,
}

impl Expectation {
    /// Inverts the pass condition.
    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.ctx.is_not = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ctx.timeout = timeout;
        self
    }

    /// Sends the command in `channel` instead of the default one.
    pub fn in_channel(mut self, channel: ChannelLocation) -> Self {
        self.ctx.channel = channel;
        self
    }

    pub fn in_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.ctx.channel.guild_id = Some(guild_id.into());
        self
    }

    pub fn context(&self) -> &AssertionContext {
        &self.ctx
    }

    /// Runs `matcher` and records the verdict on the test.
    pub async fn evaluate(self, matcher: Box<dyn Matcher>) -> Verdict {
        let verdict = self
            .scope
            .engine
            .run(&self.ctx, matcher)
            .await
            .with_trace(self.trace);
        self.scope.record(verdict.clone());
        verdict
    }

    pub async fn to_return(self, expected: impl Into<Value>) -> Verdict {
        self.evaluate(Box::new(ToReturn::new(expected.into()))).await
    }

    pub async fn to_return_in_channel(
        self,
        expected: impl Into<Value>,
        channel: ChannelLocation,
    ) -> Verdict {
        self.evaluate(Box::new(ToReturnInChannel::new(expected.into(), channel)))
            .await
    }

    pub async fn to_edit_message(
        self,
        target: MessageIdentifier,
        expected: impl Into<Value>,
    ) -> Verdict {
        self.evaluate(Box::new(ToEditMessage::new(target, expected.into())))
            .await
    }

    /// Reactions on the command message. `emojis` is a string or a list.
    pub async fn to_add_reaction(self, emojis: impl Into<Value>) -> Verdict {
        self.evaluate(Box::new(ReactionMatcher::add(emojis.into())))
            .await
    }

    pub async fn to_add_reaction_on(
        self,
        emojis: impl Into<Value>,
        target: MessageIdentifier,
    ) -> Verdict {
        self.evaluate(Box::new(ReactionMatcher::add(emojis.into()).on(target)))
            .await
    }

    pub async fn to_remove_reaction(self, emojis: impl Into<Value>) -> Verdict {
        self.evaluate(Box::new(ReactionMatcher::remove(emojis.into())))
            .await
    }

    pub async fn to_remove_reaction_on(
        self,
        emojis: impl Into<Value>,
        target: MessageIdentifier,
    ) -> Verdict {
        self.evaluate(Box::new(ReactionMatcher::remove(emojis.into()).on(target)))
            .await
    }

    pub async fn to_pin(self, target: MessageIdentifier) -> Verdict {
        self.evaluate(Box::new(PinMatcher::pin(target))).await
    }

    pub async fn to_unpin(self, target: MessageIdentifier) -> Verdict {
        self.evaluate(Box::new(PinMatcher::unpin(target))).await
    }

    pub async fn to_rename_role(
        self,
        new_name: impl Into<Value>,
        role: impl Into<RoleIdentifier>,
    ) -> Verdict {
        self.evaluate(Box::new(ToRenameRole::new(new_name.into(), role.into())))
            .await
    }

    pub async fn to_set_role_mentionable(
        self,
        mentionable: impl Into<Value>,
        role: impl Into<RoleIdentifier>,
    ) -> Verdict {
        self.evaluate(Box::new(ToSetRoleFlag::mentionable(
            mentionable.into(),
            role.into(),
        )))
        .await
    }

    pub async fn to_set_role_hoist(
        self,
        hoist: impl Into<Value>,
        role: impl Into<RoleIdentifier>,
    ) -> Verdict {
        self.evaluate(Box::new(ToSetRoleFlag::hoist(hoist.into(), role.into())))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, role};
    use parley_proto::{Occurrence, Transport, TransportError};

    fn scope(mock: &MockTransport) -> TestScope {
        let defaults = AssertionDefaults {
            bot_prefix: "!".to_string(),
            timeout: Duration::from_millis(300),
            channel: ChannelLocation::new("c").with_guild("g"),
            bot_id: Some("bot".to_string()),
        };
        TestScope::new(AssertionEngine::new(Arc::new(mock.clone())), Arc::new(defaults))
    }

    #[tokio::test]
    async fn test_prefix_is_prepended_and_verdict_recorded() {
        let mock = MockTransport::connected();
        mock.reply("!ping", Duration::from_millis(10), "pong");
        let t = scope(&mock);

        let verdict = t.expect("ping").to_return("pong").await;
        assert!(verdict.passed(), "{}", verdict);
        assert_eq!(mock.sent_contents(), vec!["!ping".to_string()]);
        assert_eq!(t.verdicts(), vec![verdict]);
    }

    #[tokio::test]
    async fn test_trace_points_at_the_calling_line() {
        let mock = MockTransport::connected();
        let t = scope(&mock);
        let verdict = t
            .expect("ping")
            .with_timeout(Duration::from_millis(20))
            .to_return("pong")
            .await;
        assert!(verdict.trace().unwrap().contains("expect.rs"));

        let t = scope(&mock).with_trace("greetings.test.yml");
        let verdict = t
            .expect("ping")
            .with_timeout(Duration::from_millis(20))
            .to_return("pong")
            .await;
        assert_eq!(verdict.trace(), Some("greetings.test.yml"));
    }

    #[tokio::test]
    async fn test_negated_rename_records_failure() {
        let mock = MockTransport::connected();
        let member = role("r1", "Member");
        mock.with_role(member.clone());
        let mut admin = member.clone();
        admin.name = "Admin".to_string();
        mock.emit_after(
            Duration::from_millis(50),
            Occurrence::RoleUpdate {
                before: member,
                after: admin,
            },
        );

        let t = scope(&mock);
        let verdict = t.expect("promote").not().to_rename_role("Admin", "r1").await;
        assert!(!verdict.passed());
        assert!(verdict.message().contains("'Admin'"));
        assert_eq!(t.take_verdicts().len(), 1);
        assert!(t.verdicts().is_empty());
    }

    #[tokio::test]
    async fn test_send_message_before_login_fails() {
        let mock = MockTransport::new();
        let t = scope(&mock);
        assert_eq!(
            t.send_message("hello").await.unwrap_err(),
            TransportError::NotConnected
        );

        mock.connect().await.unwrap();
        let sent = t.send_message("hello").await.unwrap();
        assert_eq!(sent.content, "hello");
    }
}
