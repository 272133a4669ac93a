//! WebSocket gateway transport.
//!
//! The gateway relays the chat platform as JSON text frames. Every frame
//! carries an `op` tag:
//!
//! - client to gateway: `identify`, `send_message`, `find_role`
//! - gateway to client: `ready`, `event`, `reply`, `error`
//!
//! Requests carry a `nonce`; the matching `reply` or `error` echoes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parley_proto::{
    ChannelLocation, EventHub, Message, Occurrence, Role, RoleIdentifier, Transport,
    TransportError, TransportResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, info, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Identify {
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<&'a str>,
    },
    SendMessage {
        nonce: u64,
        channel_id: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        guild_id: Option<&'a str>,
        content: &'a str,
    },
    FindRole {
        nonce: u64,
        guild_id: &'a str,
        role: &'a RoleIdentifier,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ServerFrame {
    Ready {
        #[serde(default)]
        user_id: Option<String>,
    },
    Event {
        event: Occurrence,
    },
    Reply {
        nonce: u64,
        #[serde(default)]
        data: Value,
    },
    Error {
        #[serde(default)]
        nonce: Option<u64>,
        message: String,
    },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

struct Connection {
    outgoing: mpsc::UnboundedSender<Frame>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// [`Transport`] over a WebSocket gateway.
pub struct GatewayTransport {
    url: String,
    token: Option<String>,
    request_timeout: Duration,
    hub: EventHub,
    ready: Arc<watch::Sender<bool>>,
    pending: Pending,
    next_nonce: AtomicU64,
    connection: Mutex<Option<Connection>>,
}

impl GatewayTransport {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            url: url.into(),
            token,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            hub: EventHub::new(),
            ready: Arc::new(ready),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_nonce: AtomicU64::new(1),
            connection: Mutex::new(None),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn outgoing(&self) -> TransportResult<mpsc::UnboundedSender<Frame>> {
        self.connection()
            .as_ref()
            .map(|c| c.outgoing.clone())
            .ok_or(TransportError::NotConnected)
    }

    fn push(&self, frame: &ClientFrame<'_>) -> TransportResult<()> {
        let text = serde_json::to_string(frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.outgoing()?
            .send(Frame::Text(text))
            .map_err(|_| TransportError::NotConnected)
    }

    /// Sends a request built around a fresh nonce and waits for its reply.
    async fn request<'a, F>(&self, build: F) -> TransportResult<Value>
    where
        F: FnOnce(u64) -> ClientFrame<'a>,
    {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(nonce, tx);

        if let Err(e) = self.push(&build(nonce)) {
            lock(&self.pending).remove(&nonce);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(message))) => Err(TransportError::Send(message)),
            // The reader dropped every pending request when the socket closed.
            Ok(Err(_)) => Err(TransportError::NotConnected),
            Err(_) => {
                lock(&self.pending).remove(&nonce);
                Err(TransportError::RequestTimeout(self.request_timeout))
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Applies one inbound frame to the hub, readiness and pending requests.
fn dispatch(text: &str, hub: &EventHub, ready: &watch::Sender<bool>, pending: &Pending) {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed gateway frame");
            return;
        }
    };
    match frame {
        ServerFrame::Ready { user_id } => {
            info!(user = user_id.as_deref().unwrap_or("unknown"), "Gateway ready");
            ready.send_replace(true);
        }
        ServerFrame::Event { event } => {
            let delivered = hub.publish(event);
            debug!(delivered, "Relayed gateway event");
        }
        ServerFrame::Reply { nonce, data } => {
            if let Some(tx) = lock(pending).remove(&nonce) {
                let _ = tx.send(Ok(data));
            }
        }
        ServerFrame::Error {
            nonce: Some(nonce),
            message,
        } => {
            if let Some(tx) = lock(pending).remove(&nonce) {
                let _ = tx.send(Err(message));
            }
        }
        ServerFrame::Error {
            nonce: None,
            message,
        } => warn!(error = %message, "Gateway reported an error"),
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn connect(&self) -> TransportResult<()> {
        if self.connection().is_some() {
            return Ok(());
        }
        info!(url = %self.url, "Connecting to gateway");
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (outgoing, mut queue) = mpsc::unbounded_channel::<Frame>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                let closing = matches!(frame, Frame::Close(_));
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "Gateway write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let hub = self.hub.clone();
        let ready = self.ready.clone();
        let pending = self.pending.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Frame::Text(text)) => dispatch(&text, &hub, &ready, &pending),
                    Ok(Frame::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Gateway read failed");
                        break;
                    }
                }
            }
            debug!("Gateway stream ended");
            ready.send_replace(false);
            lock(&pending).clear();
        });

        *self.connection() = Some(Connection {
            outgoing,
            reader,
            writer,
        });
        self.push(&ClientFrame::Identify {
            token: self.token.as_deref(),
        })
    }

    fn readiness(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let connection = self.connection().take();
        let Some(connection) = connection else {
            return Ok(());
        };
        let _ = connection.outgoing.send(Frame::Close(None));
        if tokio::time::timeout(Duration::from_secs(1), connection.writer)
            .await
            .is_err()
        {
            debug!("Gateway writer did not finish closing in time");
        }
        connection.reader.abort();
        self.ready.send_replace(false);
        lock(&self.pending).clear();
        info!("Disconnected from gateway");
        Ok(())
    }

    async fn send_message(
        &self,
        location: &ChannelLocation,
        content: &str,
    ) -> TransportResult<Message> {
        let data = self
            .request(|nonce| ClientFrame::SendMessage {
                nonce,
                channel_id: &location.channel_id,
                guild_id: location.guild_id.as_deref(),
                content,
            })
            .await?;
        serde_json::from_value(data).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn find_role(
        &self,
        guild_id: &str,
        role: &RoleIdentifier,
    ) -> TransportResult<Option<Role>> {
        let data = self
            .request(|nonce| ClientFrame::FindRole {
                nonce,
                guild_id,
                role,
            })
            .await?;
        serde_json::from_value(data).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    fn events(&self) -> &EventHub {
        &self.hub
    }
}

impl std::fmt::Debug for GatewayTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayTransport")
            .field("url", &self.url)
            .field("connected", &self.connection().is_some())
            .field("ready", &*self.ready.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_proto::EventKind;

    fn channel_hub() -> (EventHub, watch::Sender<bool>, Pending) {
        let (ready, _) = watch::channel(false);
        (EventHub::new(), ready, Arc::new(Mutex::new(HashMap::new())))
    }

    #[test]
    fn test_client_frames_are_tagged() {
        let frame = ClientFrame::SendMessage {
            nonce: 7,
            channel_id: "c",
            guild_id: None,
            content: "!ping",
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"op": "send_message", "nonce": 7, "channel_id": "c", "content": "!ping"})
        );
    }

    #[test]
    fn test_dispatch_ready_and_replies() {
        let (hub, ready, pending) = channel_hub();
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(3, tx);

        dispatch(r#"{"op": "ready", "user_id": "u1"}"#, &hub, &ready, &pending);
        assert!(*ready.borrow());

        dispatch(r#"{"op": "reply", "nonce": 3, "data": {"x": 1}}"#, &hub, &ready, &pending);
        assert_eq!(rx.try_recv().unwrap(), Ok(serde_json::json!({"x": 1})));
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_error_resolves_request() {
        let (hub, ready, pending) = channel_hub();
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(9, tx);

        let frame = r#"{"op": "error", "nonce": 9, "message": "missing permissions"}"#;
        dispatch(frame, &hub, &ready, &pending);
        assert_eq!(rx.try_recv().unwrap(), Err("missing permissions".to_string()));

        // Unsolicited errors and garbage are ignored.
        dispatch(r#"{"op": "error", "message": "rate limited"}"#, &hub, &ready, &pending);
        dispatch("not json", &hub, &ready, &pending);
    }

    #[tokio::test]
    async fn test_dispatch_publishes_events() {
        let (hub, ready, pending) = channel_hub();
        let mut sub = hub.subscribe(EventKind::RoleUpdate);
        let role = serde_json::json!({"id": "r1", "guild_id": "g", "name": "Admin"});
        let frame = serde_json::json!({
            "op": "event",
            "event": {"kind": "role_update", "before": role, "after": role},
        });

        dispatch(&frame.to_string(), &hub, &ready, &pending);

        let occurrence = sub.next().await.unwrap();
        assert_eq!(occurrence.kind(), EventKind::RoleUpdate);
    }

    #[tokio::test]
    async fn test_requests_need_a_connection() {
        let transport = GatewayTransport::new("ws://127.0.0.1:1/gateway", None);
        let err = transport
            .send_message(&ChannelLocation::new("c"), "hi")
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
        assert!(lock(&transport.pending).is_empty());
        transport.disconnect().await.unwrap();
    }
}
