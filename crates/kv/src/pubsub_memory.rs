use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::{BoxStream, PubSub, Result};

const CHANNEL_CAPACITY: usize = 1024;

/// Single-process pub/sub over `tokio::sync::broadcast`. Delivers to
/// subscribers within the same worker only; [`crate::pubsub_sqlx::SqlxPubSub`]
/// is the cross-worker implementation.
#[derive(Clone)]
pub struct InProcessPubSub {
    topics: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl InProcessPubSub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for InProcessPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InProcessPubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // No subscribers is not an error: the message is simply dropped.
        let _ = self.sender_for(topic).send(payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream> {
        let rx = self.sender_for(topic).subscribe();
        let stream = tokio_stream::wrappers::BroadcastStream::new(rx)
            .filter_map(|item| async move { item.ok() });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = InProcessPubSub::new();
        let mut stream = bus.subscribe("ws:broadcast").await.unwrap();
        bus.publish("ws:broadcast", b"hello".to_vec()).await.unwrap();
        let received = stream.next().await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = InProcessPubSub::new();
        bus.publish("ws:broadcast", b"hello".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InProcessPubSub::new();
        let mut stream_a = bus.subscribe("topic-a").await.unwrap();
        let _stream_b = bus.subscribe("topic-b").await.unwrap();
        bus.publish("topic-a", b"only-a".to_vec()).await.unwrap();
        let received = stream_a.next().await.unwrap();
        assert_eq!(received, b"only-a");
    }
}
