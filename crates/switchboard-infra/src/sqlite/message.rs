//! SQLite message store.
//!
//! Implements `MessageStore` from `switchboard-core`. History is ordered by
//! insertion (rowid), which matches creation order on a single writer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use switchboard_core::orchestrator::MessageStore;
use switchboard_types::chat::{ChatMessage, NewMessage, SenderType};
use switchboard_types::error::StoreError;

use super::pool::DatabasePool;
use super::store_error;

/// SQLite-backed implementation of `MessageStore`.
pub struct SqliteMessageStore {
    pool: DatabasePool,
}

impl SqliteMessageStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self, session_id: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(store_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct MessageRow {
    id: String,
    session_id: String,
    conversation_id: Option<String>,
    sender_type: String,
    sender_id: Option<String>,
    content: String,
    metadata: String,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            conversation_id: row.try_get("conversation_id")?,
            sender_type: row.try_get("sender_type")?,
            sender_id: row.try_get("sender_id")?,
            content: row.try_get("content")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, StoreError> {
        let sender_type: SenderType = self.sender_type.parse().map_err(StoreError::Query)?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&self.metadata)
            .map_err(|e| StoreError::Serialization(format!("invalid metadata JSON: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Query(format!("invalid datetime: {e}")))?;

        Ok(ChatMessage {
            id: self.id,
            session_id: self.session_id,
            conversation_id: self.conversation_id,
            sender_type,
            sender_id: self.sender_id,
            content: self.content,
            metadata,
            created_at,
        })
    }
}

fn rows_to_messages(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<ChatMessage>, StoreError> {
    rows.iter()
        .map(|row| {
            MessageRow::from_row(row)
                .map_err(store_error)
                .and_then(MessageRow::into_message)
        })
        .collect()
}

const COLUMNS: &str = "id, session_id, conversation_id, sender_type, sender_id, content, metadata, created_at";

impl MessageStore for SqliteMessageStore {
    async fn save(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        let stored = ChatMessage {
            id: Uuid::now_v7().to_string(),
            session_id: message.session_id,
            conversation_id: message.conversation_id,
            sender_type: message.sender_type,
            sender_id: message.sender_id,
            content: message.content,
            metadata: message.metadata,
            created_at: Utc::now(),
        };
        let metadata = serde_json::to_string(&stored.metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(&format!("INSERT INTO messages ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"))
            .bind(&stored.id)
            .bind(&stored.session_id)
            .bind(&stored.conversation_id)
            .bind(stored.sender_type.to_string())
            .bind(&stored.sender_id)
            .bind(&stored.content)
            .bind(&metadata)
            .bind(stored.created_at.to_rfc3339())
            .execute(&self.pool.writer)
            .await
            .map_err(store_error)?;

        Ok(stored)
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM messages WHERE session_id = ? ORDER BY rowid DESC LIMIT ?"
        ))
        .bind(session_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(store_error)?;

        let mut messages = rows_to_messages(&rows)?;
        messages.reverse();
        Ok(messages)
    }

    async fn history(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM messages WHERE session_id = ? ORDER BY rowid ASC LIMIT ? OFFSET ?"
        ))
        .bind(session_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(store_error)?;

        rows_to_messages(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_support::test_pool;
    use serde_json::json;

    fn new_message(session_id: &str, sender_type: SenderType, content: &str) -> NewMessage {
        NewMessage {
            session_id: session_id.to_string(),
            conversation_id: None,
            sender_type,
            sender_id: None,
            content: content.to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_save_round_trips_metadata() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteMessageStore::new(pool);

        let mut message = new_message("s1", SenderType::Ai, "hello");
        message.metadata.insert("chunks".to_string(), json!(3));
        let saved = store.save(message).await.unwrap();

        let loaded = store.recent("s1", 10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, saved.id);
        assert_eq!(loaded[0].sender_type, SenderType::Ai);
        assert_eq!(loaded[0].metadata.get("chunks"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_recent_is_chronological_tail() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteMessageStore::new(pool);

        for i in 0..5 {
            store
                .save(new_message("s1", SenderType::Contact, &format!("m{i}")))
                .await
                .unwrap();
        }
        store
            .save(new_message("s2", SenderType::Contact, "elsewhere"))
            .await
            .unwrap();

        let recent = store.recent("s1", 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
        assert_eq!(store.count("s1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteMessageStore::new(pool);

        for i in 0..4 {
            store
                .save(new_message("s1", SenderType::Contact, &format!("m{i}")))
                .await
                .unwrap();
        }

        let page = store.history("s1", 2, 2).await.unwrap();
        let contents: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3"]);
    }
}
