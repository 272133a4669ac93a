//! Correlating occurrences on the shared event stream.
//!
//! An [`EventWaiter`] is armed *before* the stimulus is sent, so that an
//! occurrence fired faster than the send call returns is still observed.
//! Waiting consumes the waiter and releases its subscription exactly once,
//! whether the wait matched, timed out, or saw the stream close. Dropping an
//! armed waiter without waiting releases the subscription as well.

use std::time::Duration;

use parley_proto::{EventHub, EventKind, Occurrence, Subscription, SubscriptionError};
use thiserror::Error;
use tracing::debug;

/// Ways a wait can end without a match.
#[derive(Debug, Error)]
pub enum WaitError {
    /// No (complete) match arrived before the deadline.
    #[error("no matching {kind} occurred within {timeout:?}")]
    Timeout {
        kind: EventKind,
        timeout: Duration,
        /// Matching occurrences seen before the deadline, if the wait needed
        /// more than one.
        observed: Vec<Occurrence>,
    },

    /// The subscription was force-released (teardown) while waiting.
    #[error("event stream closed while waiting for {kind}")]
    Closed { kind: EventKind },

    /// Releasing the subscription violated the lifecycle invariant.
    #[error(transparent)]
    Release(#[from] SubscriptionError),
}

/// An armed, single-use wait for occurrences of one kind.
#[derive(Debug)]
pub struct EventWaiter {
    subscription: Subscription,
    timeout: Duration,
}

impl EventWaiter {
    /// Subscribes to `kind` immediately. The deadline starts when
    /// [`wait`](Self::wait) or [`gather`](Self::gather) is called.
    pub fn arm(hub: &EventHub, kind: EventKind, timeout: Duration) -> Self {
        Self {
            subscription: hub.subscribe(kind),
            timeout,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.subscription.kind()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves with the first occurrence accepted by `predicate`.
    pub async fn wait<P>(self, predicate: P) -> Result<Occurrence, WaitError>
    where
        P: Fn(&Occurrence) -> bool,
    {
        let mut matched = self.gather(predicate, |m| !m.is_empty()).await?;
        Ok(matched.remove(0))
    }

    /// Collects occurrences accepted by `predicate`, in arrival order, until
    /// `is_complete` holds for the collected set.
    pub async fn gather<P, C>(
        self,
        predicate: P,
        is_complete: C,
    ) -> Result<Vec<Occurrence>, WaitError>
    where
        P: Fn(&Occurrence) -> bool,
        C: Fn(&[Occurrence]) -> bool,
    {
        let Self {
            mut subscription,
            timeout,
        } = self;
        let kind = subscription.kind();
        let mut matched = Vec::new();

        let outcome = tokio::time::timeout(timeout, async {
            while let Some(occurrence) = subscription.next().await {
                if predicate(&occurrence) {
                    matched.push(occurrence);
                    if is_complete(&matched) {
                        return true;
                    }
                }
            }
            false
        })
        .await;

        subscription.release()?;

        match outcome {
            Ok(true) => {
                debug!(kind = %kind, matches = matched.len(), "Correlated occurrence");
                Ok(matched)
            }
            Ok(false) => Err(WaitError::Closed { kind }),
            Err(_) => {
                debug!(kind = %kind, ?timeout, "Correlation timed out");
                Err(WaitError::Timeout {
                    kind,
                    timeout,
                    observed: matched,
                })
            }
        }
    }
}
