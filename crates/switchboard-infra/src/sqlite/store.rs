//! SQLite implementation of the shared key-value store.
//!
//! Plain values, sets and scored sets live in separate tables keyed by the
//! store key; TTLs live in `key_expiry`. Reads filter out expired keys,
//! writes purge an expired key before touching it, and
//! [`SqliteStore::purge_expired`] reclaims the rest in bulk.

use std::time::Duration;

use chrono::Utc;
use sqlx::Row;

use switchboard_core::store::SharedStore;
use switchboard_types::error::StoreError;

use super::pool::DatabasePool;
use super::store_error;

const LIVE: &str = "NOT EXISTS (SELECT 1 FROM key_expiry e WHERE e.key = t.key AND e.expires_at_ms <= ?)";

/// SQLite-backed implementation of `SharedStore`.
pub struct SqliteStore {
    pool: DatabasePool,
}

impl SqliteStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn deadline_ms(ttl: Duration) -> i64 {
        Self::now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }

    /// Drop every key whose TTL has passed. Returns the number of keys.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Self::now_ms();
        let mut tx = self.pool.writer.begin().await.map_err(store_error)?;
        for table in ["kv_entries", "set_members", "zset_members"] {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE key IN (SELECT key FROM key_expiry WHERE expires_at_ms <= ?)"
            ))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }
        let purged = sqlx::query("DELETE FROM key_expiry WHERE expires_at_ms <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?
            .rows_affected();
        tx.commit().await.map_err(store_error)?;

        if purged > 0 {
            tracing::debug!(purged, "Purged expired store keys");
        }
        Ok(purged)
    }

    /// Remove `key` everywhere if its TTL has passed.
    async fn evict_if_expired(&self, key: &str) -> Result<(), StoreError> {
        let expires: Option<i64> =
            sqlx::query_scalar("SELECT expires_at_ms FROM key_expiry WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool.writer)
                .await
                .map_err(store_error)?;
        match expires {
            Some(at) if at <= Self::now_ms() => {
                self.remove_key(key).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Delete a key from every table. Returns whether a value existed.
    async fn remove_key(&self, key: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(store_error)?;
        let mut removed = 0;
        for table in ["kv_entries", "set_members", "zset_members"] {
            removed += sqlx::query(&format!("DELETE FROM {table} WHERE key = ?"))
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?
                .rows_affected();
        }
        sqlx::query("DELETE FROM key_expiry WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        tx.commit().await.map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"SELECT 1 FROM kv_entries WHERE key = ?1
               UNION ALL SELECT 1 FROM set_members WHERE key = ?1
               UNION ALL SELECT 1 FROM zset_members WHERE key = ?1
               LIMIT 1"#,
        )
        .bind(key)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(store_error)?;
        Ok(found.is_some())
    }

    async fn clear_expiry_if_empty(&self, key: &str) -> Result<(), StoreError> {
        if !self.key_exists(key).await? {
            sqlx::query("DELETE FROM key_expiry WHERE key = ?")
                .bind(key)
                .execute(&self.pool.writer)
                .await
                .map_err(store_error)?;
        }
        Ok(())
    }
}

impl SharedStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(&format!("SELECT value FROM kv_entries t WHERE key = ? AND {LIVE}"))
            .bind(key)
            .bind(Self::now_ms())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(store_error)?;

        row.map(|row| row.try_get::<String, _>("value"))
            .transpose()
            .map_err(store_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.evict_if_expired(key).await?;
        let mut tx = self.pool.writer.begin().await.map_err(store_error)?;
        sqlx::query(
            "INSERT INTO kv_entries (key, value) VALUES (?, ?) ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        match ttl {
            Some(ttl) => {
                sqlx::query(
                    "INSERT INTO key_expiry (key, expires_at_ms) VALUES (?, ?) ON CONFLICT (key) DO UPDATE SET expires_at_ms = excluded.expires_at_ms",
                )
                .bind(key)
                .bind(Self::deadline_ms(ttl))
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
            }
            None => {
                sqlx::query("DELETE FROM key_expiry WHERE key = ?")
                    .bind(key)
                    .execute(&mut *tx)
                    .await
                    .map_err(store_error)?;
            }
        }
        tx.commit().await.map_err(store_error)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.evict_if_expired(key).await?;
        self.remove_key(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.evict_if_expired(key).await?;
        if !self.key_exists(key).await? {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO key_expiry (key, expires_at_ms) VALUES (?, ?) ON CONFLICT (key) DO UPDATE SET expires_at_ms = excluded.expires_at_ms",
        )
        .bind(key)
        .bind(Self::deadline_ms(ttl))
        .execute(&self.pool.writer)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.evict_if_expired(key).await?;
        sqlx::query("INSERT OR IGNORE INTO set_members (key, member) VALUES (?, ?)")
            .bind(key)
            .bind(member)
            .execute(&self.pool.writer)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.evict_if_expired(key).await?;
        sqlx::query("DELETE FROM set_members WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .execute(&self.pool.writer)
            .await
            .map_err(store_error)?;
        self.clear_expiry_if_empty(key).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar(&format!("SELECT member FROM set_members t WHERE key = ? AND {LIVE}"))
            .bind(key)
            .bind(Self::now_ms())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(store_error)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.evict_if_expired(key).await?;
        sqlx::query(
            "INSERT INTO zset_members (key, member, score) VALUES (?, ?, ?) ON CONFLICT (key, member) DO UPDATE SET score = excluded.score",
        )
        .bind(key)
        .bind(member)
        .bind(score)
        .execute(&self.pool.writer)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        self.evict_if_expired(key).await?;
        let removed = sqlx::query("DELETE FROM zset_members WHERE key = ? AND score >= ? AND score <= ?")
            .bind(key)
            .bind(min)
            .bind(max)
            .execute(&self.pool.writer)
            .await
            .map_err(store_error)?
            .rows_affected();
        if removed > 0 {
            self.clear_expiry_if_empty(key).await?;
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM zset_members t WHERE key = ? AND {LIVE}"
        ))
        .bind(key)
        .bind(Self::now_ms())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(store_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool.reader)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_support::test_pool;

    #[tokio::test]
    async fn test_set_get_delete() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteStore::new(pool);

        store.set("greeting", "hello", None).await.unwrap();
        store.set("greeting", "hi", None).await.unwrap();
        assert_eq!(store.get("greeting").await.unwrap().as_deref(), Some("hi"));

        assert!(store.delete("greeting").await.unwrap());
        assert!(!store.delete("greeting").await.unwrap());
        assert!(store.get("greeting").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expires_value() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteStore::new(pool);

        store
            .set("short", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        store.set("long", "v", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.get("short").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_without_ttl_clears_previous_ttl() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteStore::new(pool);

        store
            .set("k", "v1", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        store.set("k", "v2", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_set_membership() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteStore::new(pool);

        store.set_add("users", "a").await.unwrap();
        store.set_add("users", "b").await.unwrap();
        store.set_add("users", "a").await.unwrap();
        let mut members = store.set_members("users").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        store.set_remove("users", "a").await.unwrap();
        assert_eq!(store.set_members("users").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_expire_applies_to_sets() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteStore::new(pool);

        store.set_add("idx", "a").await.unwrap();
        store.expire("idx", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.set_members("idx").await.unwrap().is_empty());
        // Writing to an expired key starts it fresh, without the old TTL.
        store.set_add("idx", "b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.set_members("idx").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_expire_on_missing_key_is_noop() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteStore::new(pool.clone());

        store.expire("ghost", Duration::from_secs(60)).await.unwrap();
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM key_expiry")
            .fetch_one(&pool.reader)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_sorted_set_window() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteStore::new(pool);

        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
            store.zadd("window", member, score).await.unwrap();
        }
        assert_eq!(store.zcard("window").await.unwrap(), 3);

        assert_eq!(store.zrem_range_by_score("window", 0.0, 2.0).await.unwrap(), 2);
        assert_eq!(store.zcard("window").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ping() {
        let (pool, _dir) = test_pool().await;
        SqliteStore::new(pool).ping().await.unwrap();
    }
}
