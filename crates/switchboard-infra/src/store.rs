//! Store selection from the configured URL.
//!
//! `memory://` keeps everything in-process (single instance only);
//! `sqlite://...` persists to a SQLite file shared by every instance on the
//! host.

use std::time::Duration;

use switchboard_core::orchestrator::{InMemoryMessageStore, MessageStore};
use switchboard_core::store::{MemoryStore, SharedStore};
use switchboard_types::chat::{ChatMessage, NewMessage};
use switchboard_types::error::StoreError;

use crate::sqlite::message::SqliteMessageStore;
use crate::sqlite::pool::DatabasePool;
use crate::sqlite::store::SqliteStore;

const MEMORY_URL: &str = "memory://";

/// Shared store backend chosen at startup.
pub enum AnyStore {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

/// Message store backend matching [`AnyStore`].
pub enum AnyMessageStore {
    Memory(InMemoryMessageStore),
    Sqlite(SqliteMessageStore),
}

/// Open both stores for `url`.
pub async fn open_stores(url: &str) -> Result<(AnyStore, AnyMessageStore), StoreError> {
    if url.starts_with(MEMORY_URL) {
        tracing::info!("Using in-memory store");
        return Ok((
            AnyStore::Memory(MemoryStore::new()),
            AnyMessageStore::Memory(InMemoryMessageStore::new()),
        ));
    }
    if !url.starts_with("sqlite:") {
        return Err(StoreError::Unavailable(format!(
            "unsupported store url '{url}', expected memory:// or sqlite://"
        )));
    }

    let pool = DatabasePool::open(url).await?;
    tracing::info!(url, "Using SQLite store");
    Ok((
        AnyStore::Sqlite(SqliteStore::new(pool.clone())),
        AnyMessageStore::Sqlite(SqliteMessageStore::new(pool)),
    ))
}

impl AnyStore {
    pub fn backend(&self) -> &'static str {
        match self {
            AnyStore::Memory(_) => "memory",
            AnyStore::Sqlite(_) => "sqlite",
        }
    }

    /// Release backend resources. The store is unusable afterwards.
    pub async fn close(&self) {
        if let AnyStore::Sqlite(store) = self {
            store.pool().close().await;
        }
    }

    /// Reclaim keys whose TTL has passed.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        match self {
            AnyStore::Memory(store) => Ok(store.purge_expired() as u64),
            AnyStore::Sqlite(store) => store.purge_expired().await,
        }
    }
}

impl SharedStore for AnyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            AnyStore::Memory(s) => s.get(key).await,
            AnyStore::Sqlite(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        match self {
            AnyStore::Memory(s) => s.set(key, value, ttl).await,
            AnyStore::Sqlite(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match self {
            AnyStore::Memory(s) => s.delete(key).await,
            AnyStore::Sqlite(s) => s.delete(key).await,
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            AnyStore::Memory(s) => s.expire(key, ttl).await,
            AnyStore::Sqlite(s) => s.expire(key, ttl).await,
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        match self {
            AnyStore::Memory(s) => s.set_add(key, member).await,
            AnyStore::Sqlite(s) => s.set_add(key, member).await,
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        match self {
            AnyStore::Memory(s) => s.set_remove(key, member).await,
            AnyStore::Sqlite(s) => s.set_remove(key, member).await,
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self {
            AnyStore::Memory(s) => s.set_members(key).await,
            AnyStore::Sqlite(s) => s.set_members(key).await,
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        match self {
            AnyStore::Memory(s) => s.zadd(key, member, score).await,
            AnyStore::Sqlite(s) => s.zadd(key, member, score).await,
        }
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        match self {
            AnyStore::Memory(s) => s.zrem_range_by_score(key, min, max).await,
            AnyStore::Sqlite(s) => s.zrem_range_by_score(key, min, max).await,
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        match self {
            AnyStore::Memory(s) => s.zcard(key).await,
            AnyStore::Sqlite(s) => s.zcard(key).await,
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self {
            AnyStore::Memory(s) => s.ping().await,
            AnyStore::Sqlite(s) => s.ping().await,
        }
    }
}

impl MessageStore for AnyMessageStore {
    async fn save(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        match self {
            AnyMessageStore::Memory(s) => s.save(message).await,
            AnyMessageStore::Sqlite(s) => s.save(message).await,
        }
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        match self {
            AnyMessageStore::Memory(s) => s.recent(session_id, limit).await,
            AnyMessageStore::Sqlite(s) => s.recent(session_id, limit).await,
        }
    }

    async fn history(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        match self {
            AnyMessageStore::Memory(s) => s.history(session_id, limit, offset).await,
            AnyMessageStore::Sqlite(s) => s.history(session_id, limit, offset).await,
        }
    }
}
