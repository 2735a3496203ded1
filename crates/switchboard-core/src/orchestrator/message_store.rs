//! Message persistence port.

use std::future::Future;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use switchboard_types::chat::{ChatMessage, NewMessage};
use switchboard_types::error::StoreError;

/// Durable conversation history.
pub trait MessageStore: Send + Sync {
    /// Persist a message and return it with its assigned id and timestamp.
    fn save(&self, message: NewMessage) -> impl Future<Output = Result<ChatMessage, StoreError>> + Send;

    /// The last `limit` messages of a session, oldest first.
    fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, StoreError>> + Send;

    /// A page of a session's history, oldest first.
    fn history(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, StoreError>> + Send;
}

/// Process-local message store for tests and single-node runs.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    sessions: DashMap<String, Vec<ChatMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for InMemoryMessageStore {
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
        self.sessions
            .entry(stored.session_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|messages| {
                let start = messages.len().saturating_sub(limit);
                messages[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn history(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|messages| messages.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
