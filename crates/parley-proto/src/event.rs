//! Platform occurrences observed on the shared event stream.
//!
//! A bot under test reacts to a command by causing one or more of these
//! occurrences. Assertions subscribe to a single [`EventKind`] and test each
//! arriving [`Occurrence`] of that kind against a predicate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of occurrence an assertion can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageCreate,
    MessageUpdate,
    MessagePinned,
    MessageUnpinned,
    ReactionAdd,
    ReactionRemove,
    RoleUpdate,
}

impl EventKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MessageCreate => "message_create",
            EventKind::MessageUpdate => "message_update",
            EventKind::MessagePinned => "message_pinned",
            EventKind::MessageUnpinned => "message_unpinned",
            EventKind::ReactionAdd => "reaction_add",
            EventKind::ReactionRemove => "reaction_remove",
            EventKind::RoleUpdate => "role_update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub pinned: bool,
}

impl Message {
    /// Returns the first embed of the message, if any.
    pub fn embed(&self) -> Option<&Embed> {
        self.embeds.first()
    }
}

/// Rich embed attached to a message.
///
/// Every field is optional so that partial embeds written in test files
/// deserialize; equality is still exact over all fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// A reaction placed on (or removed from) a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// A guild role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    #[serde(default)]
    pub mentionable: bool,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub color: u32,
}

/// A single notification from the platform event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Occurrence {
    MessageCreate {
        message: Message,
    },
    MessageUpdate {
        #[serde(default)]
        before: Option<Message>,
        after: Message,
    },
    MessagePinned {
        message: Message,
    },
    MessageUnpinned {
        message: Message,
    },
    ReactionAdd {
        reaction: Reaction,
    },
    ReactionRemove {
        reaction: Reaction,
    },
    RoleUpdate {
        before: Role,
        after: Role,
    },
}

impl Occurrence {
    /// Returns the kind used to route this occurrence to subscribers.
    pub fn kind(&self) -> EventKind {
        match self {
            Occurrence::MessageCreate { .. } => EventKind::MessageCreate,
            Occurrence::MessageUpdate { .. } => EventKind::MessageUpdate,
            Occurrence::MessagePinned { .. } => EventKind::MessagePinned,
            Occurrence::MessageUnpinned { .. } => EventKind::MessageUnpinned,
            Occurrence::ReactionAdd { .. } => EventKind::ReactionAdd,
            Occurrence::ReactionRemove { .. } => EventKind::ReactionRemove,
            Occurrence::RoleUpdate { .. } => EventKind::RoleUpdate,
        }
    }

    /// Returns the message carried by message-shaped occurrences.
    ///
    /// For updates this is the message after the edit.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Occurrence::MessageCreate { message }
            | Occurrence::MessagePinned { message }
            | Occurrence::MessageUnpinned { message } => Some(message),
            Occurrence::MessageUpdate { after, .. } => Some(after),
            _ => None,
        }
    }

    /// Returns the reaction carried by reaction occurrences.
    pub fn reaction(&self) -> Option<&Reaction> {
        match self {
            Occurrence::ReactionAdd { reaction } | Occurrence::ReactionRemove { reaction } => {
                Some(reaction)
            }
            _ => None,
        }
    }

    /// Returns `(before, after)` for role updates.
    pub fn role_update(&self) -> Option<(&Role, &Role)> {
        match self {
            Occurrence::RoleUpdate { before, after } => Some((before, after)),
            _ => None,
        }
    }
}
