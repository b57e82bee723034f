use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Row, any::AnyPool};

use crate::{BoxStream, PubSub, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cross-worker pub/sub backed by an append-only outbox table in the shared
/// database. Every worker polls for rows inserted after the last one it has
/// seen; there is no push notification, so delivery latency is bounded by
/// the poll interval rather than instantaneous.
#[derive(Clone)]
pub struct SqlxPubSub {
    pool: AnyPool,
    poll_interval: Duration,
}

impl SqlxPubSub {
    #[must_use]
    pub fn new(pool: AnyPool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chatcore_pubsub (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                topic TEXT NOT NULL, \
                payload BLOB NOT NULL, \
                published_at_ms BIGINT NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PubSub for SqlxPubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        sqlx::query(
            "INSERT INTO chatcore_pubsub (topic, payload, published_at_ms) VALUES (?, ?, ?)",
        )
        .bind(topic)
        .bind(payload)
        .bind(chatcore_common::now_millis() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream> {
        let pool = self.pool.clone();
        let topic = topic.to_string();
        let poll_interval = self.poll_interval;

        // Start from the current max id so a new subscriber does not replay
        // history published before it subscribed.
        let mut last_seen_id: i64 = sqlx::query("SELECT COALESCE(MAX(id), 0) AS max_id FROM chatcore_pubsub WHERE topic = ?")
            .bind(&topic)
            .fetch_one(&pool)
            .await
            .ok()
            .and_then(|row| row.try_get::<i64, _>("max_id").ok())
            .unwrap_or(0);

        let stream = async_stream::stream! {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                let rows = sqlx::query(
                    "SELECT id, payload FROM chatcore_pubsub WHERE topic = ? AND id > ? ORDER BY id ASC",
                )
                .bind(&topic)
                .bind(last_seen_id)
                .fetch_all(&pool)
                .await;

                let Ok(rows) = rows else {
                    continue;
                };
                for row in rows {
                    if let Ok(id) = row.try_get::<i64, _>("id") {
                        last_seen_id = id;
                    }
                    if let Ok(payload) = row.try_get::<Vec<u8>, _>("payload") {
                        yield payload;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use sqlx::any::install_default_drivers;

    use super::*;

    async fn memory_pool() -> AnyPool {
        install_default_drivers();
        AnyPool::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn publish_then_subscribe_delivers_new_messages() {
        let pool = memory_pool().await;
        let bus = SqlxPubSub::new(pool).with_poll_interval(Duration::from_millis(10));
        bus.migrate().await.unwrap();

        let mut stream = bus.subscribe("ws:broadcast").await.unwrap();
        bus.publish("ws:broadcast", b"hello".to_vec()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn subscribe_does_not_replay_messages_published_before_it() {
        let pool = memory_pool().await;
        let bus = SqlxPubSub::new(pool).with_poll_interval(Duration::from_millis(10));
        bus.migrate().await.unwrap();

        bus.publish("ws:broadcast", b"before".to_vec()).await.unwrap();
        let mut stream = bus.subscribe("ws:broadcast").await.unwrap();
        bus.publish("ws:broadcast", b"after".to_vec()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"after");
    }
}
