//! Connection lifecycle shared by a whole run.
//!
//! One [`ConnectionGate`] is built per process and handed to the executor.
//! It owns login and logout; nothing runs until it reports ready.

use std::sync::Arc;
use std::time::Duration;

use parley_proto::{Transport, TransportError};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::assertion::AssertionEngine;

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("client was not ready after {0:?}")]
    ReadyTimeout(Duration),

    /// The transport dropped its readiness channel before becoming ready.
    #[error("transport closed before becoming ready")]
    ReadinessLost,
}

/// Snapshot of the gate. Starts as not ready, not logged in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateState {
    pub is_ready: bool,
    pub is_logged_in: bool,
}

pub struct ConnectionGate {
    transport: Arc<dyn Transport>,
    state: watch::Sender<GateState>,
    login_timeout: Option<Duration>,
    /// Serializes login and logout.
    lifecycle: Mutex<()>,
}

impl ConnectionGate {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(GateState::default());
        Self {
            transport,
            state,
            login_timeout: None,
            lifecycle: Mutex::new(()),
        }
    }

    /// Bounds how long [`login`](Self::login) waits for readiness.
    pub fn with_login_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.login_timeout = timeout;
        self
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// An engine bound to this gate's transport.
    pub fn engine(&self) -> AssertionEngine {
        AssertionEngine::new(self.transport.clone())
    }

    /// Connects and suspends until the transport reports ready.
    ///
    /// Calling it while already logged in and ready does nothing.
    pub async fn login(&self) -> Result<(), GateError> {
        let _guard = self.lifecycle.lock().await;
        let current = self.state();
        if current.is_logged_in && current.is_ready {
            debug!("Already logged in");
            return Ok(());
        }

        info!("Logging in");
        self.transport.connect().await?;
        self.state.send_modify(|s| s.is_logged_in = true);

        if let Err(e) = self.await_readiness().await {
            warn!(error = %e, "Client never became ready, disconnecting");
            self.state.send_replace(GateState::default());
            if let Err(disconnect) = self.transport.disconnect().await {
                warn!(error = %disconnect, "Disconnect after failed login failed");
            }
            return Err(e);
        }

        self.state.send_modify(|s| s.is_ready = true);
        info!("Client is ready");
        Ok(())
    }

    async fn await_readiness(&self) -> Result<(), GateError> {
        let mut readiness = self.transport.readiness();
        let ready = async move {
            readiness
                .wait_for(|ready| *ready)
                .await
                .map(|_| ())
                .map_err(|_| GateError::ReadinessLost)
        };
        match self.login_timeout {
            Some(limit) => tokio::time::timeout(limit, ready)
                .await
                .map_err(|_| GateError::ReadyTimeout(limit))?,
            None => ready.await,
        }
    }

    /// Releases pending subscriptions and disconnects.
    ///
    /// Calling it when not logged in does nothing.
    pub async fn logout(&self) -> Result<(), GateError> {
        let _guard = self.lifecycle.lock().await;
        if !self.state().is_logged_in {
            debug!("Logout requested while logged out");
            return Ok(());
        }

        let released = self.transport.events().release_all();
        if released > 0 {
            warn!(released, "Released pending subscriptions during logout");
        }
        self.state.send_replace(GateState::default());
        self.transport.disconnect().await?;
        info!("Logged out");
        Ok(())
    }

    /// Suspends until the gate is ready. There is no upper bound.
    pub async fn wait_ready(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = state.wait_for(|s| s.is_ready).await;
    }
}

impl std::fmt::Debug for ConnectionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGate")
            .field("state", &self.state())
            .field("login_timeout", &self.login_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use parley_proto::EventKind;

    #[tokio::test]
    async fn test_login_waits_for_readiness() {
        let mock = MockTransport::new().manual_ready();
        let gate = Arc::new(ConnectionGate::new(Arc::new(mock.clone())));
        assert_eq!(gate.state(), GateState::default());

        let login = tokio::spawn({
            let gate = gate.clone();
            async move { gate.login().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!gate.is_ready());
        assert!(gate.state().is_logged_in);

        mock.signal_ready();
        login.await.unwrap().unwrap();
        assert_eq!(
            gate.state(),
            GateState {
                is_ready: true,
                is_logged_in: true
            }
        );
    }

    #[tokio::test]
    async fn test_login_timeout() {
        let mock = MockTransport::new().manual_ready();
        let gate = ConnectionGate::new(Arc::new(mock.clone()))
            .with_login_timeout(Some(Duration::from_millis(50)));
        let err = gate.login().await.unwrap_err();
        assert!(matches!(err, GateError::ReadyTimeout(_)));
        assert_eq!(gate.state(), GateState::default());
        assert!(!mock.is_connected());
        assert_eq!(mock.disconnect_count(), 1);

        // Nothing is left to tear down.
        gate.logout().await.unwrap();
        assert_eq!(mock.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_surfaced() {
        let mock = MockTransport::new();
        mock.fail_connect("bad token");
        let gate = ConnectionGate::new(Arc::new(mock));
        let err = gate.login().await.unwrap_err();
        assert!(matches!(
            err,
            GateError::Transport(TransportError::Connect(ref reason)) if reason == "bad token"
        ));
        assert_eq!(gate.state(), GateState::default());
    }

    #[tokio::test]
    async fn test_login_and_logout_are_idempotent() {
        let mock = MockTransport::new();
        let gate = ConnectionGate::new(Arc::new(mock.clone()));

        gate.logout().await.unwrap();
        assert_eq!(mock.disconnect_count(), 0);

        gate.login().await.unwrap();
        gate.login().await.unwrap();
        assert!(gate.is_ready());

        let pending = mock.subscribe(EventKind::MessageCreate);
        gate.logout().await.unwrap();
        gate.logout().await.unwrap();
        assert_eq!(mock.disconnect_count(), 1);
        assert!(!mock.is_connected());
        assert_eq!(mock.events().active_subscriptions(), 0);
        assert_eq!(gate.state(), GateState::default());
        drop(pending);
    }

    #[tokio::test]
    async fn test_wait_ready_resumes_after_login() {
        let gate = Arc::new(ConnectionGate::new(Arc::new(MockTransport::new())));
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait_ready().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.login().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
