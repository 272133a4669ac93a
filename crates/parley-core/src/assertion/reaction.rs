//! Reaction assertions.
//!
//! With several emojis the wait gathers reactions on the target message
//! until every expected emoji has been seen at least once.

use parley_proto::{EventKind, Message, MessageIdentifier, Occurrence};
use serde_json::Value;

use super::{AssertionContext, Comparison, Matcher, Predicate, not, type_of};
use crate::verdict::report;

/// The bot adds (or removes) one or more reactions on a message.
#[derive(Debug, Clone)]
pub struct ReactionMatcher {
    raw: Value,
    emojis: Vec<String>,
    /// Defaults to the stimulus message.
    target: Option<MessageIdentifier>,
    removal: bool,
}

impl ReactionMatcher {
    /// `emojis` is a string or a list of strings.
    pub fn add(emojis: Value) -> Self {
        Self {
            raw: emojis,
            emojis: Vec::new(),
            target: None,
            removal: false,
        }
    }

    pub fn remove(emojis: Value) -> Self {
        Self {
            removal: true,
            ..Self::add(emojis)
        }
    }

    pub fn on(mut self, target: MessageIdentifier) -> Self {
        self.target = Some(target);
        self
    }

    fn verb(&self) -> &'static str {
        if self.removal { "remove" } else { "add" }
    }

    fn seen<'a>(matched: &'a [Occurrence]) -> impl Iterator<Item = &'a str> {
        matched
            .iter()
            .filter_map(Occurrence::reaction)
            .map(|r| r.emoji.as_str())
    }

    fn target_label(&self) -> String {
        self.target
            .as_ref()
            .map_or_else(|| "the command message".to_string(), ToString::to_string)
    }
}

impl Matcher for ReactionMatcher {
    fn name(&self) -> &'static str {
        if self.removal {
            "to_remove_reaction"
        } else {
            "to_add_reaction"
        }
    }

    fn validate(&mut self, _ctx: &AssertionContext) -> Result<(), String> {
        let emojis = match &self.raw {
            Value::String(emoji) => vec![emoji.clone()],
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| report("every reaction to be a string", &self.raw))?,
            other => {
                return Err(report(
                    "reactions to be a string or a list of strings",
                    type_of(other),
                ));
            }
        };
        if emojis.is_empty() || emojis.iter().any(|e| e.trim().is_empty()) {
            return Err(report("at least one non-empty reaction", &self.raw));
        }
        if let Some(target) = &self.target
            && target.id.is_none()
        {
            return Err(report("a message identifier with an id", target));
        }
        self.emojis = emojis;
        Ok(())
    }

    fn event_kind(&self) -> EventKind {
        if self.removal {
            EventKind::ReactionRemove
        } else {
            EventKind::ReactionAdd
        }
    }

    fn predicate(&self, ctx: &AssertionContext, stimulus: &Message) -> Predicate {
        let message_id = self
            .target
            .as_ref()
            .and_then(|t| t.id.clone())
            .unwrap_or_else(|| stimulus.id.clone());
        let emojis = self.emojis.clone();
        let bot = ctx.bot_id.clone();
        Box::new(move |occ| {
            occ.reaction().is_some_and(|r| {
                r.message_id == message_id
                    && emojis.contains(&r.emoji)
                    && bot.as_deref().is_none_or(|b| b == r.user_id)
            })
        })
    }

    fn is_complete(&self, matched: &[Occurrence]) -> bool {
        self.emojis
            .iter()
            .all(|emoji| Self::seen(matched).any(|seen| seen == emoji.as_str()))
    }

    fn compare(&self, matched: &[Occurrence]) -> Comparison {
        let seen: Vec<&str> = Self::seen(matched).collect();
        let verb = if self.removal { "removed" } else { "added" };
        Comparison::new(
            self.is_complete(matched),
            format!("reactions [{}] were {}", seen.join(", "), verb),
        )
    }

    fn expectation(&self, negated: bool) -> String {
        format!(
            "to {}{} reactions [{}] on {}",
            not(negated),
            self.verb(),
            self.emojis.join(", "),
            self.target_label()
        )
    }

    fn event_description(&self) -> String {
        format!("{} of reactions [{}]", self.verb(), self.emojis.join(", "))
    }
}
