//! # parley-proto
//!
//! Shared vocabulary for the Parley framework.
//!
//! This crate provides the types every other Parley crate speaks:
//! - Platform identifiers and the occurrences a bot can cause
//!   (messages, pins, reactions, role updates)
//! - The [`EventHub`] subscription registry that fans occurrences out to
//!   waiting assertions
//! - The [`Transport`] trait implemented by connection backends

mod event;
mod hub;
mod ids;
mod transport;

pub use event::{
    Embed, EmbedAuthor, EmbedField, EmbedFooter, EventKind, Message, Occurrence, Reaction, Role,
};
pub use hub::{EventHub, Subscription, SubscriptionError, SubscriptionId};
pub use ids::{ChannelLocation, MessageIdentifier, RoleIdentifier};
pub use transport::{Transport, TransportError, TransportResult};
