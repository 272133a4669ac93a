//! In-memory transport for tests.
//!
//! [`MockTransport`] plays both sides: it accepts stimuli like a real client
//! and, when a scripted command arrives, emits the occurrences a bot would
//! cause after the configured delays.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use parley_proto::{
    ChannelLocation, EventHub, Message, Occurrence, Reaction, Role, RoleIdentifier, Transport,
    TransportError, TransportResult,
};
use tokio::sync::watch;

/// Author id the mock uses for its scripted bot.
pub const BOT_ID: &str = "bot";

/// Author id the mock uses for stimuli it sends.
pub const TESTER_ID: &str = "tester";

type Responder = Arc<dyn Fn(&Message) -> Vec<(Duration, Occurrence)> + Send + Sync>;

#[derive(Default)]
struct MockState {
    connected: bool,
    manual_ready: bool,
    connect_failure: Option<String>,
    send_failure: Option<String>,
    responders: HashMap<String, Responder>,
    roles: Vec<Role>,
    sent: Vec<Message>,
    next_id: u64,
    disconnects: usize,
}

struct Inner {
    hub: EventHub,
    ready: watch::Sender<bool>,
    state: Mutex<MockState>,
}

/// Scriptable [`Transport`] backed by an in-process [`EventHub`].
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A disconnected mock that becomes ready as soon as it connects.
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                hub: EventHub::new(),
                ready,
                state: Mutex::new(MockState::default()),
            }),
        }
    }

    /// A mock that is already connected and ready.
    pub fn connected() -> Self {
        let mock = Self::new();
        mock.lock().connected = true;
        mock.inner.ready.send_replace(true);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Readiness must be signaled explicitly with [`signal_ready`](Self::signal_ready).
    pub fn manual_ready(self) -> Self {
        self.lock().manual_ready = true;
        self
    }

    pub fn signal_ready(&self) {
        self.inner.ready.send_replace(true);
    }

    /// Makes [`connect`](Transport::connect) fail.
    pub fn fail_connect(&self, reason: impl Into<String>) {
        self.lock().connect_failure = Some(reason.into());
    }

    /// Makes every subsequent send fail.
    pub fn fail_sends(&self, reason: impl Into<String>) {
        self.lock().send_failure = Some(reason.into());
    }

    /// Registers a role that `find_role` can resolve.
    pub fn with_role(&self, role: Role) {
        self.lock().roles.push(role);
    }

    /// Scripts the reaction to `command`: the responder receives the stimulus
    /// and returns occurrences with their delays.
    pub fn respond<F>(&self, command: &str, responder: F)
    where
        F: Fn(&Message) -> Vec<(Duration, Occurrence)> + Send + Sync + 'static,
    {
        self.lock()
            .responders
            .insert(command.to_string(), Arc::new(responder));
    }

    /// Scripts a plain text reply from the bot in the stimulus channel.
    pub fn reply(&self, command: &str, delay: Duration, content: &str) {
        let content = content.to_string();
        let counter = Arc::new(Mutex::new(0u64));
        self.respond(command, move |stimulus| {
            let mut n = counter.lock().unwrap_or_else(PoisonError::into_inner);
            *n += 1;
            let mut reply = message(
                &format!("reply-{}-{}", stimulus.id, n),
                &stimulus.channel_id,
                BOT_ID,
                &content,
            );
            reply.guild_id.clone_from(&stimulus.guild_id);
            vec![(delay, Occurrence::MessageCreate { message: reply })]
        });
    }

    /// Publishes an occurrence now.
    pub fn emit(&self, occurrence: Occurrence) -> usize {
        self.inner.hub.publish(occurrence)
    }

    /// Publishes an occurrence after `delay`, from a background task.
    pub fn emit_after(&self, delay: Duration, occurrence: Occurrence) {
        let hub = self.inner.hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            hub.publish(occurrence);
        });
    }

    /// Every stimulus sent so far, in order.
    pub fn sent(&self) -> Vec<Message> {
        self.lock().sent.clone()
    }

    /// Contents of every stimulus sent so far.
    pub fn sent_contents(&self) -> Vec<String> {
        self.lock().sent.iter().map(|m| m.content.clone()).collect()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> TransportResult<()> {
        let manual = {
            let mut state = self.lock();
            if let Some(reason) = &state.connect_failure {
                return Err(TransportError::Connect(reason.clone()));
            }
            state.connected = true;
            state.manual_ready
        };
        if !manual {
            self.inner.ready.send_replace(true);
        }
        Ok(())
    }

    fn readiness(&self) -> watch::Receiver<bool> {
        self.inner.ready.subscribe()
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let mut state = self.lock();
        state.connected = false;
        state.disconnects += 1;
        self.inner.ready.send_replace(false);
        Ok(())
    }

    async fn send_message(
        &self,
        location: &ChannelLocation,
        content: &str,
    ) -> TransportResult<Message> {
        let (stimulus, responder) = {
            let mut state = self.lock();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if let Some(reason) = &state.send_failure {
                return Err(TransportError::Send(reason.clone()));
            }
            state.next_id += 1;
            let mut stimulus = message(
                &format!("msg-{}", state.next_id),
                &location.channel_id,
                TESTER_ID,
                content,
            );
            stimulus.guild_id.clone_from(&location.guild_id);
            state.sent.push(stimulus.clone());
            (stimulus, state.responders.get(content).cloned())
        };

        self.inner.hub.publish(Occurrence::MessageCreate {
            message: stimulus.clone(),
        });

        if let Some(responder) = responder {
            for (delay, occurrence) in responder(&stimulus) {
                self.emit_after(delay, occurrence);
            }
        }
        Ok(stimulus)
    }

    async fn find_role(
        &self,
        guild_id: &str,
        role: &RoleIdentifier,
    ) -> TransportResult<Option<Role>> {
        let state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(state
            .roles
            .iter()
            .find(|r| r.guild_id == guild_id && role.matches(r))
            .cloned())
    }

    fn events(&self) -> &EventHub {
        &self.inner.hub
    }
}

/// Builds a message with no guild, embeds or pin.
pub fn message(id: &str, channel_id: &str, author_id: &str, content: &str) -> Message {
    Message {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        guild_id: None,
        author_id: author_id.to_string(),
        content: content.to_string(),
        embeds: Vec::new(),
        pinned: false,
    }
}

/// Builds a reaction placed by the scripted bot in channel `c`.
pub fn reaction(message_id: &str, emoji: &str) -> Reaction {
    Reaction {
        message_id: message_id.to_string(),
        channel_id: "c".to_string(),
        user_id: BOT_ID.to_string(),
        emoji: emoji.to_string(),
    }
}

/// Builds a role in guild `g` with every flag off.
pub fn role(id: &str, name: &str) -> Role {
    Role {
        id: id.to_string(),
        guild_id: "g".to_string(),
        name: name.to_string(),
        mentionable: false,
        hoist: false,
        color: 0,
    }
}
