//! Message assertions: replies, edits, pins.

use parley_proto::{ChannelLocation, EventKind, Message, MessageIdentifier, Occurrence};
use serde_json::Value;

use super::{AssertionContext, Comparison, Matcher, MessageContent, Predicate, not};
use crate::verdict::report;

fn first_message(matched: &[Occurrence]) -> Option<&Message> {
    matched.first().and_then(Occurrence::message)
}

/// The bot replies in the command channel with the expected content.
#[derive(Debug, Clone)]
pub struct ToReturn {
    expected: Value,
    content: Option<MessageContent>,
}

impl ToReturn {
    pub fn new(expected: Value) -> Self {
        Self {
            expected,
            content: None,
        }
    }
}

/// Predicate for a bot message posted in `channel` that is not the stimulus.
fn reply_in(channel: ChannelLocation, ctx: &AssertionContext, stimulus: &Message) -> Predicate {
    let bot = ctx.bot_id.clone();
    let stimulus_id = stimulus.id.clone();
    Box::new(move |occ| {
        occ.message().is_some_and(|m| {
            m.id != stimulus_id
                && channel.contains(m)
                && bot.as_deref().is_none_or(|b| b == m.author_id)
        })
    })
}

fn compare_content(content: Option<&MessageContent>, matched: &[Occurrence]) -> Comparison {
    match (content, first_message(matched)) {
        (Some(content), Some(message)) => {
            Comparison::new(content.matches(message), content.describe(message))
        }
        _ => Comparison::new(false, "no message"),
    }
}

fn content_label(content: Option<&MessageContent>, raw: &Value) -> String {
    content.map_or_else(|| raw.to_string(), ToString::to_string)
}

impl Matcher for ToReturn {
    fn name(&self) -> &'static str {
        "to_return"
    }

    fn validate(&mut self, _ctx: &AssertionContext) -> Result<(), String> {
        self.content = Some(MessageContent::from_value(&self.expected)?);
        Ok(())
    }

    fn event_kind(&self) -> EventKind {
        EventKind::MessageCreate
    }

    fn predicate(&self, ctx: &AssertionContext, stimulus: &Message) -> Predicate {
        reply_in(ctx.channel.clone(), ctx, stimulus)
    }

    fn compare(&self, matched: &[Occurrence]) -> Comparison {
        compare_content(self.content.as_ref(), matched)
    }

    fn expectation(&self, negated: bool) -> String {
        format!(
            "bot {}to return {}",
            not(negated),
            content_label(self.content.as_ref(), &self.expected)
        )
    }

    fn event_description(&self) -> String {
        "a reply from the bot".to_string()
    }
}

/// The bot posts the expected content in another channel.
#[derive(Debug, Clone)]
pub struct ToReturnInChannel {
    expected: Value,
    channel: ChannelLocation,
    content: Option<MessageContent>,
}

impl ToReturnInChannel {
    pub fn new(expected: Value, channel: ChannelLocation) -> Self {
        Self {
            expected,
            channel,
            content: None,
        }
    }
}

impl Matcher for ToReturnInChannel {
    fn name(&self) -> &'static str {
        "to_return_in_channel"
    }

    fn validate(&mut self, _ctx: &AssertionContext) -> Result<(), String> {
        self.content = Some(MessageContent::from_value(&self.expected)?);
        if self.channel.channel_id.trim().is_empty() {
            return Err(report(
                "channel to be a string with the channel id or an object with its id",
                "an empty channel id",
            ));
        }
        Ok(())
    }

    fn event_kind(&self) -> EventKind {
        EventKind::MessageCreate
    }

    fn predicate(&self, ctx: &AssertionContext, stimulus: &Message) -> Predicate {
        reply_in(self.channel.clone(), ctx, stimulus)
    }

    fn compare(&self, matched: &[Occurrence]) -> Comparison {
        compare_content(self.content.as_ref(), matched)
    }

    fn expectation(&self, negated: bool) -> String {
        format!(
            "bot {}to return {} in channel {}",
            not(negated),
            content_label(self.content.as_ref(), &self.expected),
            self.channel
        )
    }

    fn event_description(&self) -> String {
        format!("a message from the bot in channel {}", self.channel)
    }
}

/// The bot edits an existing message to the expected content.
#[derive(Debug, Clone)]
pub struct ToEditMessage {
    target: MessageIdentifier,
    expected: Value,
    content: Option<MessageContent>,
}

impl ToEditMessage {
    pub fn new(target: MessageIdentifier, expected: Value) -> Self {
        Self {
            target,
            expected,
            content: None,
        }
    }
}

impl Matcher for ToEditMessage {
    fn name(&self) -> &'static str {
        "to_edit_message"
    }

    fn validate(&mut self, _ctx: &AssertionContext) -> Result<(), String> {
        if self.target.is_empty() {
            return Err(report(
                "message identifier with an id or a content",
                "an empty identifier",
            ));
        }
        self.content = Some(MessageContent::from_value(&self.expected)?);
        Ok(())
    }

    fn event_kind(&self) -> EventKind {
        EventKind::MessageUpdate
    }

    fn predicate(&self, _ctx: &AssertionContext, _stimulus: &Message) -> Predicate {
        let target = self.target.clone();
        Box::new(move |occ| match occ {
            // A content identifier names the message as it was before the edit.
            Occurrence::MessageUpdate { before, after } => {
                target.matches(before.as_ref().unwrap_or(after))
            }
            _ => false,
        })
    }

    fn compare(&self, matched: &[Occurrence]) -> Comparison {
        compare_content(self.content.as_ref(), matched)
    }

    fn expectation(&self, negated: bool) -> String {
        format!(
            "{} {}to be edited to {}",
            self.target,
            not(negated),
            content_label(self.content.as_ref(), &self.expected)
        )
    }

    fn event_description(&self) -> String {
        format!("an edit of {}", self.target)
    }
}

/// The bot pins or unpins a message.
#[derive(Debug, Clone)]
pub struct PinMatcher {
    target: MessageIdentifier,
    pinned: bool,
}

impl PinMatcher {
    pub fn pin(target: MessageIdentifier) -> Self {
        Self {
            target,
            pinned: true,
        }
    }

    pub fn unpin(target: MessageIdentifier) -> Self {
        Self {
            target,
            pinned: false,
        }
    }

    fn verb(&self) -> &'static str {
        if self.pinned { "pin" } else { "unpin" }
    }
}

impl Matcher for PinMatcher {
    fn name(&self) -> &'static str {
        if self.pinned { "to_pin" } else { "to_unpin" }
    }

    fn validate(&mut self, _ctx: &AssertionContext) -> Result<(), String> {
        if self.target.is_empty() {
            return Err(report(
                "message identifier to be a string or an object with an id or a content",
                "an empty identifier",
            ));
        }
        Ok(())
    }

    fn event_kind(&self) -> EventKind {
        if self.pinned {
            EventKind::MessagePinned
        } else {
            EventKind::MessageUnpinned
        }
    }

    fn predicate(&self, _ctx: &AssertionContext, _stimulus: &Message) -> Predicate {
        let target = self.target.clone();
        Box::new(move |occ| occ.message().is_some_and(|m| target.matches(m)))
    }

    /// Observing the occurrence is the whole check.
    fn compare(&self, matched: &[Occurrence]) -> Comparison {
        Comparison::new(
            !matched.is_empty(),
            format!("message pin = {}", self.pinned),
        )
    }

    fn expectation(&self, negated: bool) -> String {
        format!("to {}{} {}", not(negated), self.verb(), self.target)
    }

    fn event_description(&self) -> String {
        format!("{} of {}", self.verb(), self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::AssertionEngine;
    use crate::testing::{MockTransport, message};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx(command: &str) -> AssertionContext {
        AssertionContext::new(command, ChannelLocation::new("c"))
            .with_bot("bot")
            .with_timeout(Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_reply_from_other_author_is_ignored() {
        let mock = MockTransport::connected();
        mock.respond("!ping", |stimulus| {
            vec![
                (
                    Duration::from_millis(10),
                    Occurrence::MessageCreate {
                        message: message("x", &stimulus.channel_id, "someone", "pong"),
                    },
                ),
                (
                    Duration::from_millis(30),
                    Occurrence::MessageCreate {
                        message: message("y", &stimulus.channel_id, "bot", "pong"),
                    },
                ),
            ]
        });

        let verdict = AssertionEngine::new(Arc::new(mock.clone()))
            .run(&ctx("!ping"), Box::new(ToReturn::new(json!("pong"))))
            .await;
        assert!(verdict.passed(), "{}", verdict);
    }

    #[tokio::test]
    async fn test_return_in_channel_ignores_command_channel() {
        let mock = MockTransport::connected();
        mock.respond("!announce", |_| {
            vec![(
                Duration::from_millis(10),
                Occurrence::MessageCreate {
                    message: message("a", "news", "bot", "hello all"),
                },
            )]
        });

        let verdict = AssertionEngine::new(Arc::new(mock.clone()))
            .run(
                &ctx("!announce"),
                Box::new(ToReturnInChannel::new(
                    json!("hello all"),
                    ChannelLocation::new("news"),
                )),
            )
            .await;
        assert!(verdict.passed(), "{}", verdict);
    }

    #[tokio::test]
    async fn test_edit_message_by_content() {
        let mock = MockTransport::connected();
        mock.respond("!edit", |_| {
            vec![(
                Duration::from_millis(10),
                Occurrence::MessageUpdate {
                    before: Some(message("m1", "c", "bot", "old")),
                    after: message("m1", "c", "bot", "new"),
                },
            )]
        });

        let verdict = AssertionEngine::new(Arc::new(mock.clone()))
            .run(
                &ctx("!edit"),
                Box::new(ToEditMessage::new(
                    MessageIdentifier::content("old"),
                    json!("new"),
                )),
            )
            .await;
        assert!(verdict.passed(), "{}", verdict);
    }

    #[tokio::test]
    async fn test_unpin_passes_and_negated_unpin_fails() {
        let mock = MockTransport::connected();
        mock.respond("!unpin", |_| {
            vec![(
                Duration::from_millis(10),
                Occurrence::MessageUnpinned {
                    message: message("42", "c", "bot", "old news"),
                },
            )]
        });
        let engine = AssertionEngine::new(Arc::new(mock.clone()));

        let verdict = engine
            .run(
                &ctx("!unpin"),
                Box::new(PinMatcher::unpin(MessageIdentifier::id("42"))),
            )
            .await;
        assert!(verdict.passed(), "{}", verdict);

        let verdict = engine
            .run(
                &ctx("!unpin").negated(true),
                Box::new(PinMatcher::unpin(MessageIdentifier::id("42"))),
            )
            .await;
        assert_eq!(
            verdict.message(),
            "expected: to not unpin message with id 42\nreceived: message pin = false"
        );
    }

    #[test]
    fn test_empty_pin_target_is_invalid() {
        let mut matcher = PinMatcher::pin(MessageIdentifier::default());
        assert!(matcher.validate(&ctx("!pin")).is_err());
    }

    #[test]
    fn test_blank_channel_is_invalid() {
        let mut matcher = ToReturnInChannel::new(json!("x"), ChannelLocation::new(" "));
        let err = matcher.validate(&ctx("!x")).unwrap_err();
        assert!(err.starts_with("expected: channel to be a string"));
    }
}
