//! Subscription registry for the shared event stream.
//!
//! Every assertion correlates against the same stream of platform
//! occurrences. The [`EventHub`] fans each published occurrence out to the
//! subscribers registered for its [`EventKind`]. A [`Subscription`] is a
//! disposable handle: it is released exactly once, either explicitly via
//! [`Subscription::release`] or when it is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::{EventKind, Occurrence};

/// Identifier handed out for each subscription.
pub type SubscriptionId = u64;

/// Invariant violations in the subscription lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The hub has no record of this subscription.
    #[error("subscription {0} is not registered (released twice?)")]
    NotRegistered(SubscriptionId),
}

struct Subscriber {
    kind: EventKind,
    tx: mpsc::UnboundedSender<Occurrence>,
}

#[derive(Default)]
struct HubState {
    next_id: SubscriptionId,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    /// Subscriptions force-released during teardown whose handles are still alive.
    evicted: HashSet<SubscriptionId>,
}

/// Fans occurrences out to per-kind subscribers.
///
/// Cloning an `EventHub` yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventHub {
    state: Arc<Mutex<HubState>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers interest in `kind`.
    ///
    /// Occurrences published after this call returns are queued on the
    /// subscription in arrival order until read.
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.subscribers.insert(id, Subscriber { kind, tx });
            id
        };
        debug!(subscription = id, kind = %kind, "Subscribed to event stream");

        Subscription {
            id,
            kind,
            rx,
            hub: self.clone(),
            released: false,
        }
    }

    /// Delivers `occurrence` to every subscriber of its kind.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, occurrence: Occurrence) -> usize {
        let kind = occurrence.kind();
        let state = self.lock();
        let mut delivered = 0;
        for subscriber in state.subscribers.values().filter(|s| s.kind == kind) {
            if subscriber.tx.send(occurrence.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(kind = %kind, delivered, "Published occurrence");
        delivered
    }

    /// Returns the number of live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Forcibly releases every live subscription.
    ///
    /// Pending waits observe a closed stream. Handles released afterwards
    /// are accepted without error. Returns the number of subscriptions
    /// that were evicted.
    pub fn release_all(&self) -> usize {
        let mut state = self.lock();
        let ids: Vec<SubscriptionId> = state.subscribers.keys().copied().collect();
        for id in &ids {
            state.subscribers.remove(id);
            state.evicted.insert(*id);
        }
        if !ids.is_empty() {
            warn!(count = ids.len(), "Force-released pending subscriptions");
        }
        ids.len()
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), SubscriptionError> {
        let mut state = self.lock();
        if state.subscribers.remove(&id).is_some() || state.evicted.remove(&id) {
            debug!(subscription = id, "Released subscription");
            Ok(())
        } else {
            Err(SubscriptionError::NotRegistered(id))
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("active_subscriptions", &self.active_subscriptions())
            .finish()
    }
}

/// A live interest in one [`EventKind`].
///
/// Released exactly once: [`release`](Self::release) consumes the handle,
/// and dropping an unreleased handle releases it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    rx: mpsc::UnboundedReceiver<Occurrence>,
    hub: EventHub,
    released: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Waits for the next occurrence. Returns `None` once the subscription
    /// has been force-released.
    pub async fn next(&mut self) -> Option<Occurrence> {
        self.rx.recv().await
    }

    /// Releases the subscription.
    pub fn release(mut self) -> Result<(), SubscriptionError> {
        self.released = true;
        self.rx.close();
        self.hub.unsubscribe(self.id)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.hub.unsubscribe(self.id)
        {
            warn!(error = %e, "Subscription release on drop failed");
        }
    }
}
