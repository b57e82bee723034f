//! `ConnectionHub` (§4.E): the per-worker fan-out core. Owns every local
//! WebSocket's mailbox, the local user→sessions index, and the
//! subscriptions that bridge [`chatcore_broker::MessageBroker`] envelopes
//! back into those mailboxes.
//!
//! Transport-agnostic by design: the hub never touches an actual socket.
//! Registering a connection hands back a [`LiveConnection`] whose
//! [`LiveConnection::send_queue`] a caller (the HTTP/WS frontend) drains
//! with its own dedicated writer task — the single-writer-per-connection
//! pattern the teacher's `ws.rs` uses, generalized with the bounded,
//! shedding queue §5 asks for.

mod send_queue;

use std::{collections::HashSet, sync::Arc, time::Duration};

use chatcore_broker::MessageBroker;
use chatcore_protocol::{ClientFrame, MAX_FRAME_BYTES, close_codes};
use chatcore_sessions::{SessionInfo, SessionStore};
use dashmap::DashMap;
use futures::StreamExt;
pub use send_queue::{PushOutcome, SendQueue};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("malformed client frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown session {0}")]
    UnknownSession(String),
    #[error(transparent)]
    Session(#[from] chatcore_sessions::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub max_frame_bytes: usize,
    pub idle_timeout: Duration,
    pub pong_timeout: Duration,
    pub send_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
            idle_timeout: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            send_queue_capacity: 64,
        }
    }
}

/// A registered WebSocket (§4.E "LiveConnection"). Holds the physical
/// socket's outbound mailbox; the socket itself is owned by the frontend.
pub struct LiveConnection {
    pub session_id: String,
    pub user_id: String,
    queue: Arc<SendQueue>,
}

impl LiveConnection {
    #[must_use]
    pub fn send_queue(&self) -> Arc<SendQueue> {
        Arc::clone(&self.queue)
    }

    /// Enqueue an outbound frame; returns `true` if the connection should
    /// now be closed for backpressure (§5).
    #[must_use]
    pub fn enqueue(&self, frame: String) -> bool {
        let (_, should_close) = self.queue.push(frame);
        should_close
    }
}

struct UserSubscription {
    refcount: usize,
    handle: tokio::task::JoinHandle<()>,
}

pub struct ConnectionHub {
    worker_id: String,
    config: HubConfig,
    session_store: Arc<dyn SessionStore>,
    broker: Arc<MessageBroker>,
    local_connections: Arc<DashMap<String, Arc<LiveConnection>>>,
    user_index: Arc<DashMap<String, HashSet<String>>>,
    user_subscriptions: AsyncMutex<std::collections::HashMap<String, UserSubscription>>,
}

impl ConnectionHub {
    #[must_use]
    pub fn new(
        worker_id: impl Into<String>,
        config: HubConfig,
        session_store: Arc<dyn SessionStore>,
        broker: Arc<MessageBroker>,
    ) -> Arc<Self> {
        let hub = Arc::new(Self {
            worker_id: worker_id.into(),
            config,
            session_store,
            broker,
            local_connections: Arc::new(DashMap::new()),
            user_index: Arc::new(DashMap::new()),
            user_subscriptions: AsyncMutex::new(std::collections::HashMap::new()),
        });
        hub.clone().spawn_global_subscriptions();
        hub
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn spawn_global_subscriptions(self: Arc<Self>) {
        let broadcast_hub = Arc::clone(&self);
        tokio::spawn(async move {
            match broadcast_hub.broker.subscribe_broadcast().await {
                Ok(mut stream) => {
                    while let Some(envelope) = stream.next().await {
                        broadcast_hub.deliver_to_all(&envelope.message.to_string());
                    }
                },
                Err(error) => tracing::error!(%error, "failed to subscribe to broadcast topic"),
            }
        });

        let control_hub = Arc::clone(&self);
        tokio::spawn(async move {
            match control_hub.broker.subscribe_control().await {
                Ok(mut stream) => {
                    while let Some(envelope) = stream.next().await {
                        tracing::info!(event = ?envelope.event_type, origin = %envelope.origin_worker_id, "worker lifecycle event");
                    }
                },
                Err(error) => tracing::error!(%error, "failed to subscribe to control topic"),
            }
        });
    }

    /// Accept step (§4.E 1): create a session, register the connection, and
    /// subscribe to the user's topic if this is their first local
    /// connection.
    pub async fn register(&self, user_id: &str) -> Result<Arc<LiveConnection>> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let info = SessionInfo::new(&session_id, user_id, &self.worker_id);
        self.session_store.create(info).await?;

        let connection = Arc::new(LiveConnection {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            queue: Arc::new(SendQueue::new(self.config.send_queue_capacity)),
        });
        self.local_connections.insert(session_id.clone(), Arc::clone(&connection));
        self.user_index.entry(user_id.to_string()).or_default().insert(session_id);

        self.ensure_user_subscription(user_id).await;
        metrics::counter!(chatcore_metrics::ws::CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(chatcore_metrics::ws::CONNECTIONS_ACTIVE).increment(1.0);

        Ok(connection)
    }

    async fn ensure_user_subscription(&self, user_id: &str) {
        let mut subscriptions = self.user_subscriptions.lock().await;
        if let Some(existing) = subscriptions.get_mut(user_id) {
            existing.refcount += 1;
            return;
        }

        let Ok(mut stream) = self.broker.subscribe_user(user_id).await else {
            tracing::error!(user_id, "failed to subscribe to per-user topic");
            return;
        };
        let hub_user_index = Arc::clone(&self.user_index);
        let local_connections = Arc::clone(&self.local_connections);
        let user_id_owned = user_id.to_string();
        let handle = tokio::spawn(async move {
            while let Some(envelope) = stream.next().await {
                let Some(session_ids) = hub_user_index.get(&user_id_owned) else {
                    continue;
                };
                let payload = envelope.message.to_string();
                for session_id in session_ids.value() {
                    if let Some(connection) = local_connections.get(session_id) {
                        connection.enqueue(payload.clone());
                    }
                }
            }
        });
        subscriptions.insert(user_id.to_string(), UserSubscription { refcount: 1, handle });
    }

    async fn release_user_subscription(&self, user_id: &str) {
        let mut subscriptions = self.user_subscriptions.lock().await;
        if let Some(existing) = subscriptions.get_mut(user_id) {
            existing.refcount = existing.refcount.saturating_sub(1);
            if existing.refcount == 0 {
                let entry = subscriptions.remove(user_id).expect("just matched above");
                entry.handle.abort();
            }
        }
    }

    /// Parse and admit an inbound frame (§4.E 2): size check, then refresh
    /// the session's activity timestamp.
    pub async fn accept_inbound(&self, session_id: &str, raw: &[u8]) -> Result<ClientFrame> {
        if raw.len() > self.config.max_frame_bytes {
            return Err(Error::FrameTooLarge {
                size: raw.len(),
                limit: self.config.max_frame_bytes,
            });
        }
        let frame: ClientFrame = serde_json::from_slice(raw)?;
        self.session_store.update_activity(session_id, chatcore_common::now_millis()).await?;
        metrics::counter!(chatcore_metrics::ws::MESSAGES_RECEIVED_TOTAL).increment(1);
        Ok(frame)
    }

    /// Deliver `frame` to one specific local connection.
    #[must_use]
    pub fn send_to_session(&self, session_id: &str, frame: String) -> bool {
        match self.local_connections.get(session_id) {
            Some(connection) => {
                metrics::counter!(chatcore_metrics::ws::MESSAGES_SENT_TOTAL).increment(1);
                connection.enqueue(frame)
            },
            None => false,
        }
    }

    fn deliver_to_all(&self, frame: &str) {
        for entry in &self.local_connections {
            entry.value().enqueue(frame.to_string());
        }
    }

    /// Close step (§4.E 4): explicit close, error, or timeout.
    pub async fn close(&self, session_id: &str, code: u16) {
        let Some((_, connection)) = self.local_connections.remove(session_id) else {
            return;
        };
        connection.queue.close();

        if let Some(mut sessions) = self.user_index.get_mut(&connection.user_id) {
            sessions.remove(session_id);
            if sessions.is_empty() {
                drop(sessions);
                self.user_index.remove(&connection.user_id);
                self.release_user_subscription(&connection.user_id).await;
            }
        }

        if let Err(error) = self.session_store.delete(session_id).await {
            tracing::warn!(%error, session_id, "failed to delete session on close");
        }
        metrics::gauge!(chatcore_metrics::ws::CONNECTIONS_ACTIVE).decrement(1.0);
        if code == close_codes::BACKPRESSURE {
            metrics::counter!(chatcore_metrics::ws::BACKPRESSURE_CLOSES_TOTAL).increment(1);
        }
    }

    /// Worker-loss cleanup (§4.E 5): sessions the store still attributes to
    /// this worker but that have no live local connection are leftovers
    /// from a previous incarnation and cannot be reattached.
    pub async fn reap_orphaned_sessions(&self) -> Result<usize> {
        let sessions = self.session_store.list_by_worker(&self.worker_id).await?;
        let mut reaped = 0;
        for session in sessions {
            if !self.local_connections.contains_key(&session.session_id) {
                self.session_store.delete(&session.session_id).await?;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    /// Shutdown (§4.E "Cancellation"): stop accepting new work, push a
    /// close frame to every connection, and give `shutdown_grace` for
    /// queues to drain before the caller tears sockets down.
    pub async fn shutdown(&self, shutdown_grace: Duration) {
        let session_ids: Vec<String> = self.local_connections.iter().map(|e| e.key().clone()).collect();
        let notice = chatcore_protocol::ServerFrame::Error {
            message: "server shutting down".to_string(),
            id: None,
        }
        .to_json();
        for session_id in &session_ids {
            self.send_to_session(session_id, notice.clone());
        }
        tokio::time::sleep(shutdown_grace).await;
        for session_id in session_ids {
            self.close(&session_id, close_codes::NORMAL).await;
        }
    }

    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.local_connections.len()
    }

    /// Passthrough to the underlying `SessionStore`'s own probe, for the
    /// aggregated health endpoint (§4.K).
    pub async fn session_store_health(&self) -> chatcore_sessions::HealthStatus {
        self.session_store.health_check().await
    }
}
