//! Metrics history storage.
//!
//! This module provides a trait-based abstraction for persisting metrics history
//! to enable historical charts that survive restarts.

use {
    crate::error::{Error, Result},
    serde::{Deserialize, Serialize},
};

/// Per-provider token metrics retained for API compatibility with deployments
/// that still export third-party usage counters alongside chat metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderTokens {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub completions: u64,
    pub errors: u64,
}

/// A historical metrics data point for time-series charts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsHistoryPoint {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// HTTP requests total.
    pub http_requests: u64,
    /// Active HTTP requests (in-flight).
    pub http_active: u64,
    /// WebSocket connections total.
    pub ws_connections: u64,
    /// Active WebSocket connections.
    pub ws_active: u64,
    /// Active sessions.
    pub active_sessions: u64,
    /// Chat messages processed (sent + received).
    pub chat_messages: u64,
    /// Rate limiter admissions.
    pub rate_limit_admitted: u64,
    /// Rate limiter denials.
    pub rate_limit_denied: u64,
    /// Response cache hits.
    pub cache_hits: u64,
    /// Response cache misses.
    pub cache_misses: u64,
}

/// Trait for metrics history storage backends.
///
/// Implementations can store metrics history in SQLite, TimescaleDB,
/// or any other time-series database.
#[async_trait::async_trait]
pub trait MetricsStore: Send + Sync {
    /// Save a new metrics data point.
    async fn save_point(&self, point: &MetricsHistoryPoint) -> Result<()>;

    /// Load metrics history since a given timestamp (millis).
    ///
    /// Returns points ordered by timestamp ascending. If `since` is 0,
    /// returns all points up to `limit`.
    async fn load_history(&self, since: u64, limit: usize) -> Result<Vec<MetricsHistoryPoint>>;

    /// Delete metrics older than the given timestamp (millis).
    ///
    /// Returns the number of deleted rows.
    async fn cleanup_before(&self, before: u64) -> Result<u64>;

    /// Get the most recent data point, if any.
    async fn latest_point(&self) -> Result<Option<MetricsHistoryPoint>>;
}

/// SQLite-based metrics store.
pub struct SqliteMetricsStore {
    pool: sqlx::SqlitePool,
}

impl SqliteMetricsStore {
    /// Create a new SQLite metrics store, opening or creating the database at `path`.
    pub async fn new(path: &std::path::Path) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = sqlx::SqlitePool::connect(&db_url)
            .await
            .map_err(Error::from)?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Create an in-memory SQLite metrics store (for testing).
    #[allow(clippy::unwrap_used, clippy::expect_used)]
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(Error::from)?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &sqlx::SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                http_requests INTEGER NOT NULL DEFAULT 0,
                http_active INTEGER NOT NULL DEFAULT 0,
                ws_connections INTEGER NOT NULL DEFAULT 0,
                ws_active INTEGER NOT NULL DEFAULT 0,
                active_sessions INTEGER NOT NULL DEFAULT 0,
                chat_messages INTEGER NOT NULL DEFAULT 0,
                rate_limit_admitted INTEGER NOT NULL DEFAULT 0,
                rate_limit_denied INTEGER NOT NULL DEFAULT 0,
                cache_hits INTEGER NOT NULL DEFAULT 0,
                cache_misses INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(Error::from)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_history_timestamp ON metrics_history(timestamp)")
            .execute(pool)
            .await
            .map_err(Error::from)?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl MetricsStore for SqliteMetricsStore {
    async fn save_point(&self, point: &MetricsHistoryPoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics_history (
                timestamp, http_requests, http_active, ws_connections, ws_active,
                active_sessions, chat_messages, rate_limit_admitted, rate_limit_denied,
                cache_hits, cache_misses
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(point.timestamp as i64)
        .bind(point.http_requests as i64)
        .bind(point.http_active as i64)
        .bind(point.ws_connections as i64)
        .bind(point.ws_active as i64)
        .bind(point.active_sessions as i64)
        .bind(point.chat_messages as i64)
        .bind(point.rate_limit_admitted as i64)
        .bind(point.rate_limit_denied as i64)
        .bind(point.cache_hits as i64)
        .bind(point.cache_misses as i64)
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(())
    }

    async fn load_history(&self, since: u64, limit: usize) -> Result<Vec<MetricsHistoryPoint>> {
        let rows = sqlx::query_as::<_, MetricsRow>(
            r#"
            SELECT timestamp, http_requests, http_active, ws_connections, ws_active,
                   active_sessions, chat_messages, rate_limit_admitted, rate_limit_denied,
                   cache_hits, cache_misses
            FROM metrics_history
            WHERE timestamp >= ?
            ORDER BY timestamp ASC
            LIMIT ?
            "#,
        )
        .bind(since as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn cleanup_before(&self, before: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM metrics_history WHERE timestamp < ?")
            .bind(before as i64)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;

        Ok(result.rows_affected())
    }

    async fn latest_point(&self) -> Result<Option<MetricsHistoryPoint>> {
        let row = sqlx::query_as::<_, MetricsRow>(
            r#"
            SELECT timestamp, http_requests, http_active, ws_connections, ws_active,
                   active_sessions, chat_messages, rate_limit_admitted, rate_limit_denied,
                   cache_hits, cache_misses
            FROM metrics_history
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(row.map(Into::into))
    }
}

#[derive(sqlx::FromRow)]
struct MetricsRow {
    timestamp: i64,
    http_requests: i64,
    http_active: i64,
    ws_connections: i64,
    ws_active: i64,
    active_sessions: i64,
    chat_messages: i64,
    rate_limit_admitted: i64,
    rate_limit_denied: i64,
    cache_hits: i64,
    cache_misses: i64,
}

impl From<MetricsRow> for MetricsHistoryPoint {
    fn from(row: MetricsRow) -> Self {
        Self {
            timestamp: row.timestamp as u64,
            http_requests: row.http_requests as u64,
            http_active: row.http_active as u64,
            ws_connections: row.ws_connections as u64,
            ws_active: row.ws_active as u64,
            active_sessions: row.active_sessions as u64,
            chat_messages: row.chat_messages as u64,
            rate_limit_admitted: row.rate_limit_admitted as u64,
            rate_limit_denied: row.rate_limit_denied as u64,
            cache_hits: row.cache_hits as u64,
            cache_misses: row.cache_misses as u64,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn make_point(timestamp: u64, chat_messages: u64) -> MetricsHistoryPoint {
        MetricsHistoryPoint {
            timestamp,
            http_requests: 0,
            http_active: 0,
            ws_connections: 0,
            ws_active: 0,
            active_sessions: 0,
            chat_messages,
            rate_limit_admitted: 0,
            rate_limit_denied: 0,
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let store = SqliteMetricsStore::in_memory().await.unwrap();
        let mut point = make_point(1000, 10);
        point.http_requests = 200;
        point.cache_hits = 5;

        store.save_point(&point).await.unwrap();

        let history = store.load_history(0, 100).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].timestamp, 1000);
        assert_eq!(history[0].chat_messages, 10);
        assert_eq!(history[0].cache_hits, 5);
    }

    #[tokio::test]
    async fn load_since_filters_older_points() {
        let store = SqliteMetricsStore::in_memory().await.unwrap();
        for i in 0..5 {
            store.save_point(&make_point(1000 + i * 100, i)).await.unwrap();
        }

        let history = store.load_history(1200, 100).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, 1200);
    }

    #[tokio::test]
    async fn cleanup_before_deletes_older_rows() {
        let store = SqliteMetricsStore::in_memory().await.unwrap();
        for i in 0..5 {
            store.save_point(&make_point(1000 + i * 100, 0)).await.unwrap();
        }

        let deleted = store.cleanup_before(1200).await.unwrap();
        assert_eq!(deleted, 2);
        let remaining = store.load_history(0, 100).await.unwrap();
        assert_eq!(remaining.len(), 3);
    }

    #[tokio::test]
    async fn latest_point_returns_most_recent() {
        let store = SqliteMetricsStore::in_memory().await.unwrap();
        for i in 0..3 {
            store.save_point(&make_point(1000 + i * 100, i)).await.unwrap();
        }

        let latest = store.latest_point().await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 1200);
    }
}
