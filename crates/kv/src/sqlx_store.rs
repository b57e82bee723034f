use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Row, any::AnyPool};

use crate::{KVStore, Result};

/// Distributed key-value store backed by the same relational database the
/// rest of the deployment already runs (sqlite for single-node, postgres for
/// multi-node). This is the implementation workers share; [`crate::memory::MemoryKv`]
/// is the single-process fallback.
#[derive(Clone)]
pub struct SqlxKv {
    pool: AnyPool,
}

impl SqlxKv {
    #[must_use]
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Create the backing tables if they do not already exist. Safe to call
    /// on every startup.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chatcore_kv (\
                k TEXT PRIMARY KEY, \
                v BLOB NOT NULL, \
                expires_at_ms BIGINT\
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chatcore_zset (\
                zkey TEXT NOT NULL, \
                member TEXT NOT NULL, \
                score BIGINT NOT NULL, \
                expires_at_ms BIGINT, \
                PRIMARY KEY (zkey, member)\
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn now_ms() -> i64 {
        chatcore_common::now_millis() as i64
    }

    fn expires_at_ms(ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|d| Self::now_ms() + d.as_millis() as i64)
    }
}

#[async_trait]
impl KVStore for SqlxKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT v, expires_at_ms FROM chatcore_kv WHERE k = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let expires_at_ms: Option<i64> = row.try_get("expires_at_ms")?;
        if let Some(deadline) = expires_at_ms
            && deadline <= Self::now_ms()
        {
            return Ok(None);
        }
        let value: Vec<u8> = row.try_get("v")?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at_ms = Self::expires_at_ms(ttl);
        sqlx::query(
            "INSERT INTO chatcore_kv (k, v, expires_at_ms) VALUES (?, ?, ?) \
             ON CONFLICT (k) DO UPDATE SET v = excluded.v, expires_at_ms = excluded.expires_at_ms",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM chatcore_kv WHERE k = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// A single statement per branch, so the check and the write are one
    /// atomic operation the database itself serializes — not a
    /// `SELECT` followed by an application-level decision, which two
    /// concurrent callers could both pass under READ COMMITTED.
    ///
    /// `expected = Some(v)` becomes `UPDATE … WHERE k = ? AND v = ? AND
    /// not-expired`; the row-level write lock the `UPDATE` itself takes is
    /// what makes this atomic, so only one of two racing callers with the
    /// same `expected` can ever see `rows_affected() == 1`.
    ///
    /// `expected = None` means "absent or expired"; there is no value to
    /// match against, so this becomes an upsert whose `DO UPDATE … WHERE`
    /// clause only fires over an already-expired row, and a true insert
    /// only fires when no row exists yet — both cases the unique index on
    /// `k` serializes against a concurrent racer the same way.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let expires_at_ms = Self::expires_at_ms(ttl);
        let now = Self::now_ms();

        let rows_affected = match expected {
            Some(expected_value) => {
                sqlx::query(
                    "UPDATE chatcore_kv SET v = ?, expires_at_ms = ? \
                     WHERE k = ? AND v = ? AND (expires_at_ms IS NULL OR expires_at_ms > ?)",
                )
                .bind(new)
                .bind(expires_at_ms)
                .bind(key)
                .bind(expected_value)
                .bind(now)
                .execute(&self.pool)
                .await?
                .rows_affected()
            },
            None => {
                sqlx::query(
                    "INSERT INTO chatcore_kv (k, v, expires_at_ms) VALUES (?, ?, ?) \
                     ON CONFLICT (k) DO UPDATE SET v = excluded.v, expires_at_ms = excluded.expires_at_ms \
                     WHERE chatcore_kv.expires_at_ms IS NOT NULL AND chatcore_kv.expires_at_ms <= ?",
                )
                .bind(key)
                .bind(new)
                .bind(expires_at_ms)
                .bind(now)
                .execute(&self.pool)
                .await?
                .rows_affected()
            },
        };

        Ok(rows_affected == 1)
    }

    async fn zadd(&self, key: &str, score: i64, member: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at_ms = Self::expires_at_ms(ttl);
        sqlx::query(
            "INSERT INTO chatcore_zset (zkey, member, score, expires_at_ms) VALUES (?, ?, ?, ?) \
             ON CONFLICT (zkey, member) DO UPDATE SET score = excluded.score, expires_at_ms = excluded.expires_at_ms",
        )
        .bind(key)
        .bind(member)
        .bind(score)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>> {
        let now = Self::now_ms();
        let rows = sqlx::query(
            "SELECT member, score FROM chatcore_zset \
             WHERE zkey = ? AND score >= ? AND score <= ? \
             AND (expires_at_ms IS NULL OR expires_at_ms > ?) \
             ORDER BY score ASC",
        )
        .bind(key)
        .bind(min)
        .bind(max)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let member: String = row.try_get("member")?;
                let score: i64 = row.try_get("score")?;
                Ok((member, score))
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(Into::into)
    }

    async fn zremrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM chatcore_zset WHERE zkey = ? AND score >= ? AND score <= ?",
        )
        .bind(key)
        .bind(min)
        .bind(max)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let now = Self::now_ms();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM chatcore_zset \
             WHERE zkey = ? AND (expires_at_ms IS NULL OR expires_at_ms > ?)",
        )
        .bind(key)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("n")?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use sqlx::any::install_default_drivers;

    use super::*;

    async fn store() -> SqlxKv {
        install_default_drivers();
        let pool = AnyPool::connect("sqlite::memory:").await.unwrap();
        let store = SqlxKv::new(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let kv = store().await;
        kv.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn cas_succeeds_only_when_expected_matches() {
        let kv = store().await;
        kv.set("k", b"old".to_vec(), None).await.unwrap();
        assert!(
            !kv.compare_and_swap("k", Some(b"wrong".to_vec()), b"new".to_vec(), None)
                .await
                .unwrap()
        );
        assert!(
            kv.compare_and_swap("k", Some(b"old".to_vec()), b"new".to_vec(), None)
                .await
                .unwrap()
        );
        assert_eq!(kv.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    /// Testable Property #3 (refresh-token single-use): for any record and
    /// `expected`, a CAS succeeds for at most one racing caller. Forces a
    /// single pooled connection so sqlite's in-memory backend (one database
    /// per connection by default) can't mask the race as two separate
    /// databases; the two `compare_and_swap` calls still race for the same
    /// row through that one connection's serialized statement queue.
    #[tokio::test]
    async fn cas_is_atomic_under_concurrent_racers() {
        install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let kv = SqlxKv::new(pool);
        kv.migrate().await.unwrap();
        kv.set("token", b"unused".to_vec(), None).await.unwrap();

        let (first, second) = tokio::join!(
            kv.compare_and_swap("token", Some(b"unused".to_vec()), b"used-by-a".to_vec(), None),
            kv.compare_and_swap("token", Some(b"unused".to_vec()), b"used-by-b".to_vec(), None),
        );
        let successes = [first.unwrap(), second.unwrap()].into_iter().filter(|ok| *ok).count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn zset_sliding_window_lifecycle() {
        let kv = store().await;
        kv.zadd("z", 10, "a", None).await.unwrap();
        kv.zadd("z", 20, "b", None).await.unwrap();
        kv.zadd("z", 30, "c", None).await.unwrap();
        assert_eq!(kv.zcard("z").await.unwrap(), 3);

        let removed = kv.zremrange_by_score("z", i64::MIN, 15).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(kv.zcard("z").await.unwrap(), 2);

        let range = kv.zrange_by_score("z", i64::MIN, i64::MAX).await.unwrap();
        assert_eq!(range, vec![("b".to_string(), 20), ("c".to_string(), 30)]);
    }
}
