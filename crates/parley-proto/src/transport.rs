use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::event::{EventKind, Message, Role};
use crate::hub::{EventHub, Subscription};
use crate::ids::{ChannelLocation, RoleIdentifier};

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised by a transport client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// An operation needed a live connection and there was none.
    #[error("client is not connected")]
    NotConnected,

    /// The connection could not be established.
    #[error("failed to connect: {0}")]
    Connect(String),

    /// A message could not be delivered.
    #[error("failed to send message: {0}")]
    Send(String),

    /// The remote side did not answer a request in time.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The remote side answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A connection to the chat platform.
///
/// Implementations publish every platform occurrence they observe into the
/// [`EventHub`] returned by [`events`](Self::events); assertions subscribe
/// there. Production code uses the gateway transport shipped with the CLI;
/// tests use `parley_core::testing::MockTransport`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts logging in. Readiness is reported separately through
    /// [`readiness`](Self::readiness).
    async fn connect(&self) -> TransportResult<()>;

    /// A watch that flips to `true` once the client is ready to send and
    /// observe.
    fn readiness(&self) -> watch::Receiver<bool>;

    /// Closes the connection.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Posts `content` in `location` and returns the created message.
    async fn send_message(
        &self,
        location: &ChannelLocation,
        content: &str,
    ) -> TransportResult<Message>;

    /// Looks up a role in a guild.
    async fn find_role(
        &self,
        guild_id: &str,
        role: &RoleIdentifier,
    ) -> TransportResult<Option<Role>>;

    /// The hub this transport publishes occurrences into.
    fn events(&self) -> &EventHub;

    /// Registers interest in one kind of occurrence.
    fn subscribe(&self, kind: EventKind) -> Subscription {
        self.events().subscribe(kind)
    }
}
