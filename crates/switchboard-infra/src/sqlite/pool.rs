//! SQLite connection pools backing the shared store and message history.
//!
//! Several switchboard instances on one host may open the same file, so the
//! database runs in WAL mode with a busy timeout. Writes are funnelled
//! through one connection; reads fan out over a small read-only pool.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use switchboard_types::error::StoreError;

const READER_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open `database_url` and bring its schema up to date.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let base_opts = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid sqlite url: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts.clone())
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // The read-only pool cannot create tables, so migrate first.
        sqlx::migrate!("../../migrations")
            .run(&writer)
            .await
            .map_err(|e| StoreError::Query(format!("migration failed: {e}")))?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(base_opts.read_only(true))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::debug!(database_url, readers = READER_CONNECTIONS, "SQLite pools ready");
        Ok(Self { reader, writer })
    }

    /// Close both pools, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_pool;

    #[tokio::test]
    async fn test_pool_creates_tables() {
        let (pool, _dir) = test_pool().await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in ["key_expiry", "kv_entries", "messages", "set_members", "zset_members"] {
            assert!(table_names.contains(&expected), "{expected} table missing");
        }
    }

    #[tokio::test]
    async fn test_pool_wal_mode() {
        let (pool, _dir) = test_pool().await;

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();

        assert_eq!(result.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn bad_url_is_unavailable() {
        let err = super::DatabasePool::open("postgres://nope").await.err().unwrap();
        assert!(matches!(err, switchboard_types::error::StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn closed_pool_rejects_queries() {
        let (pool, _dir) = test_pool().await;
        pool.close().await;
        assert!(sqlx::query("SELECT 1").execute(&pool.reader).await.is_err());
    }
}
