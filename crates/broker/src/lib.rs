//! `MessageBroker` (§4.D): a thin typed wrapper around [`chatcore_kv::PubSub`],
//! owning topic-name construction, envelope (de)serialization, and the
//! self-echo filter, so that `ConnectionHub` never touches raw `PubSub`
//! payloads directly. Generalizes the teacher's `broadcast.rs` (`BroadcastOpts`,
//! a `broadcast()` free function layered over the raw client registry) to run
//! over a pluggable bus instead of only local `dashmap` state.

use std::sync::Arc;

use chatcore_kv::PubSub;
use chatcore_protocol::{BrokerEnvelope, BrokerEventType, topics};
use futures::{Stream, StreamExt};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kv(#[from] chatcore_kv::Error),
    #[error("failed to encode broker envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A received envelope, already filtered of self-origin traffic.
pub type EnvelopeStream = std::pin::Pin<Box<dyn Stream<Item = BrokerEnvelope> + Send>>;

pub struct MessageBroker {
    pubsub: Arc<dyn PubSub>,
    worker_id: String,
}

impl MessageBroker {
    #[must_use]
    pub fn new(pubsub: Arc<dyn PubSub>, worker_id: impl Into<String>) -> Self {
        Self {
            pubsub,
            worker_id: worker_id.into(),
        }
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn publish(
        &self,
        topic: &str,
        event_type: BrokerEventType,
        target: impl Into<String>,
        message: serde_json::Value,
    ) -> Result<()> {
        let envelope = BrokerEnvelope::new(
            event_type,
            self.worker_id.clone(),
            target,
            message,
            chatcore_common::now_millis(),
        );
        let payload = serde_json::to_vec(&envelope)?;
        self.pubsub.publish(topic, payload).await?;
        Ok(())
    }

    /// Deliver a chat reply to every connection of `user_id`, across every
    /// worker.
    pub async fn publish_to_user(&self, user_id: &str, message: serde_json::Value) -> Result<()> {
        self.publish(&topics::user(user_id), BrokerEventType::ChatReply, user_id, message)
            .await
    }

    /// Deliver to one specific session only.
    pub async fn publish_to_session(&self, session_id: &str, message: serde_json::Value) -> Result<()> {
        self.publish(
            &topics::session(session_id),
            BrokerEventType::ChatReply,
            session_id,
            message,
        )
        .await
    }

    /// Announce to every connected client on every worker.
    pub async fn broadcast(&self, message: serde_json::Value) -> Result<()> {
        self.publish(topics::BROADCAST, BrokerEventType::Broadcast, "*", message)
            .await
    }

    /// Announce that this worker has joined or left the fleet.
    pub async fn announce_worker_up(&self) -> Result<()> {
        self.publish(
            topics::CONTROL,
            BrokerEventType::WorkerUp,
            self.worker_id.clone(),
            serde_json::Value::Null,
        )
        .await
    }

    pub async fn announce_worker_down(&self) -> Result<()> {
        self.publish(
            topics::CONTROL,
            BrokerEventType::WorkerDown,
            self.worker_id.clone(),
            serde_json::Value::Null,
        )
        .await
    }

    /// Subscribe to a topic, filtering out this worker's own envelopes
    /// (self-echo prevention, §4.D / §8 property 5) and any payload that
    /// fails to decode (logged, not propagated — a malformed envelope from
    /// one worker must not take down another's subscription loop).
    pub async fn subscribe(&self, topic: &str) -> Result<EnvelopeStream> {
        let raw = self.pubsub.subscribe(topic).await?;
        let worker_id = self.worker_id.clone();
        let stream = raw.filter_map(move |payload| {
            let worker_id = worker_id.clone();
            async move {
                match serde_json::from_slice::<BrokerEnvelope>(&payload) {
                    Ok(envelope) if envelope.is_self_origin(&worker_id) => None,
                    Ok(envelope) => Some(envelope),
                    Err(error) => {
                        tracing::warn!(%error, "dropping malformed broker envelope");
                        None
                    },
                }
            }
        });
        Ok(Box::pin(stream))
    }

    pub async fn subscribe_user(&self, user_id: &str) -> Result<EnvelopeStream> {
        self.subscribe(&topics::user(user_id)).await
    }

    pub async fn subscribe_broadcast(&self) -> Result<EnvelopeStream> {
        self.subscribe(topics::BROADCAST).await
    }

    pub async fn subscribe_control(&self) -> Result<EnvelopeStream> {
        self.subscribe(topics::CONTROL).await
    }

    /// Cheap reachability probe for the aggregated health endpoint (§4.K): a
    /// harmless publish to a private topic, mirroring the session store's
    /// `ws:health-check-probe` pattern in `kv_store.rs`.
    pub async fn health_check(&self) -> bool {
        self.pubsub.publish("ws:health:probe", Vec::new()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use chatcore_kv::InProcessPubSub;
    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn publish_to_user_is_received_by_a_subscriber_on_another_worker() {
        let pubsub: Arc<dyn PubSub> = Arc::new(InProcessPubSub::new());
        let sender = MessageBroker::new(pubsub.clone(), "worker-a");
        let receiver = MessageBroker::new(pubsub, "worker-b");

        let mut stream = receiver.subscribe_user("u1").await.unwrap();
        sender.publish_to_user("u1", json!({"reply": "hi"})).await.unwrap();

        let envelope = stream.next().await.unwrap();
        assert_eq!(envelope.origin_worker_id, "worker-a");
        assert_eq!(envelope.message, json!({"reply": "hi"}));
    }

    #[tokio::test]
    async fn self_origin_envelopes_are_filtered_out() {
        let pubsub: Arc<dyn PubSub> = Arc::new(InProcessPubSub::new());
        let broker = MessageBroker::new(pubsub, "worker-a");

        let mut stream = broker.subscribe_broadcast().await.unwrap();
        broker.broadcast(json!({"x": 1})).await.unwrap();

        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(50), stream.next()).await;
        assert!(timed_out.is_err(), "self-originated broadcast must not be delivered back");
    }

    #[tokio::test]
    async fn worker_lifecycle_announcements_round_trip() {
        let pubsub: Arc<dyn PubSub> = Arc::new(InProcessPubSub::new());
        let a = MessageBroker::new(pubsub.clone(), "worker-a");
        let b = MessageBroker::new(pubsub, "worker-b");

        let mut control = b.subscribe_control().await.unwrap();
        a.announce_worker_up().await.unwrap();
        let envelope = control.next().await.unwrap();
        assert_eq!(envelope.event_type, chatcore_protocol::BrokerEventType::WorkerUp);
        assert_eq!(envelope.origin_worker_id, "worker-a");
    }
}
