//! Identifiers used to point assertions at channels, messages and roles.
//!
//! Each identifier deserializes either from a bare id (string or number) or
//! from an object, so test files can write `role: "123"` as well as
//! `role: { name: "Admin" }`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::{Message, Role};

#[derive(Deserialize)]
#[serde(untagged)]
enum IdOrObject<T> {
    Text(String),
    Number(u64),
    Object(T),
}

/// A channel, optionally qualified by its guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IdOrObject<ChannelFields>")]
pub struct ChannelLocation {
    pub channel_id: String,
    pub guild_id: Option<String>,
}

#[derive(Deserialize)]
struct ChannelFields {
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
}

impl From<IdOrObject<ChannelFields>> for ChannelLocation {
    fn from(value: IdOrObject<ChannelFields>) -> Self {
        match value {
            IdOrObject::Text(id) => Self::new(id),
            IdOrObject::Number(id) => Self::new(id.to_string()),
            IdOrObject::Object(fields) => Self {
                channel_id: fields.channel_id,
                guild_id: fields.guild_id,
            },
        }
    }
}

impl ChannelLocation {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            guild_id: None,
        }
    }

    pub fn with_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    /// Returns true if the message was posted in this channel.
    pub fn contains(&self, message: &Message) -> bool {
        if message.channel_id != self.channel_id {
            return false;
        }
        match (&self.guild_id, &message.guild_id) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        }
    }
}

impl fmt::Display for ChannelLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.guild_id {
            Some(guild) => write!(f, "{} (guild {})", self.channel_id, guild),
            None => f.write_str(&self.channel_id),
        }
    }
}

/// Locates a message by id or, failing that, by its exact content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IdOrObject<MessageFields>")]
pub struct MessageIdentifier {
    pub id: Option<String>,
    pub content: Option<String>,
}

#[derive(Deserialize)]
struct MessageFields {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl From<IdOrObject<MessageFields>> for MessageIdentifier {
    fn from(value: IdOrObject<MessageFields>) -> Self {
        match value {
            IdOrObject::Text(id) => Self::id(id),
            IdOrObject::Number(id) => Self::id(id.to_string()),
            IdOrObject::Object(fields) => Self {
                id: fields.id,
                content: fields.content,
            },
        }
    }
}

impl MessageIdentifier {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            content: None,
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: Some(content.into()),
        }
    }

    /// Returns true if neither an id nor a content was given.
    pub fn is_empty(&self) -> bool {
        self.id.as_deref().is_none_or(|s| s.trim().is_empty()) && self.content.is_none()
    }

    /// Returns true if `message` is the one identified. The id wins when both
    /// fields are set.
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(id) = &self.id {
            return &message.id == id;
        }
        if let Some(content) = &self.content {
            return &message.content == content;
        }
        false
    }
}

impl fmt::Display for MessageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.content) {
            (Some(id), _) => write!(f, "message with id {}", id),
            (None, Some(content)) => write!(f, "message with content '{}'", content),
            (None, None) => f.write_str("unidentified message"),
        }
    }
}

/// Locates a role by id or by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IdOrObject<RoleFields>")]
pub struct RoleIdentifier {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
struct RoleFields {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl From<IdOrObject<RoleFields>> for RoleIdentifier {
    fn from(value: IdOrObject<RoleFields>) -> Self {
        match value {
            IdOrObject::Text(id) => Self::id(id),
            IdOrObject::Number(id) => Self::id(id.to_string()),
            IdOrObject::Object(fields) => Self {
                id: fields.id,
                name: fields.name,
            },
        }
    }
}

impl From<&str> for RoleIdentifier {
    fn from(id: &str) -> Self {
        Self::id(id)
    }
}

impl RoleIdentifier {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    /// Returns true if neither a usable id nor a usable name was given.
    pub fn is_empty(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        blank(&self.id) && blank(&self.name)
    }

    /// Returns true if `role` is the one identified. The id wins when both
    /// fields are set.
    pub fn matches(&self, role: &Role) -> bool {
        if let Some(id) = &self.id {
            return &role.id == id;
        }
        if let Some(name) = &self.name {
            return &role.name == name;
        }
        false
    }
}

impl fmt::Display for RoleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.name) {
            (Some(id), _) => write!(f, "role with id {}", id),
            (None, Some(name)) => write!(f, "role '{}'", name),
            (None, None) => f.write_str("unidentified role"),
        }
    }
}
