//! Session store.
//!
//! Sessions are JSON records under `session:{id}` with a TTL equal to the
//! maximum session duration. Two set indices sit beside them:
//! `user_sessions:{user_id}` and the global liveness index `session_index`.
//!
//! Expiry is enforced twice: lazily on every read, and by a periodic sweep
//! over the liveness index. Writes are last-writer-wins per key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use switchboard_types::config::SessionConfig;
use switchboard_types::error::{SessionError, StoreError};
use switchboard_types::session::{
    AgentSwitch, AgentType, Session, SessionStatus, SessionUpdate,
};

use crate::clock::{Clock, SystemClock};
use crate::store::SharedStore;

const SESSION_PREFIX: &str = "session:";
const USER_SESSIONS_PREFIX: &str = "user_sessions:";
const SESSION_INDEX: &str = "session_index";

/// Context key holding the list of [`AgentSwitch`] records.
pub const AGENT_SWITCHES_KEY: &str = "agent_switches";

fn session_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

fn user_key(user_id: &str) -> String {
    format!("{USER_SESSIONS_PREFIX}{user_id}")
}

/// Session lifecycle service, generic over the shared store.
pub struct SessionStore<S: SharedStore> {
    store: Arc<S>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl<S: SharedStore> SessionStore<S> {
    pub fn new(store: Arc<S>, config: SessionConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session, evicting the user's oldest live sessions first if
    /// they already hold `max_sessions_per_user`.
    pub async fn create(
        &self,
        user_id: &str,
        agent_type: AgentType,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<Session, SessionError> {
        let existing = self.list_by_user(user_id).await?;
        let max = self.config.max_sessions_per_user.max(1);
        if existing.len() >= max {
            let excess = existing.len() + 1 - max;
            for oldest in existing.iter().take(excess) {
                tracing::info!(
                    session_id = %oldest.session_id,
                    user_id,
                    "Evicting oldest session to stay within per-user limit"
                );
                self.close(&oldest.session_id).await?;
            }
        }

        let now = self.clock.now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            conversation_id: None,
            agent_type,
            status: SessionStatus::Active,
            context: HashMap::new(),
            metadata: metadata.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            last_activity_at: now,
            expires_at: now + chrono::Duration::seconds(self.config.max_duration_secs as i64),
        };

        self.save(&session).await?;
        let user_index = user_key(user_id);
        self.store.set_add(&user_index, &session.session_id).await?;
        self.store
            .expire(&user_index, Duration::from_secs(self.config.max_duration_secs))
            .await?;
        self.store
            .set_add(SESSION_INDEX, &session.session_id)
            .await?;

        tracing::info!(session_id = %session.session_id, user_id, "Session created");
        Ok(session)
    }

    /// Fetch a live session.
    ///
    /// Closed sessions read as `None`. A session past `expires_at` is retired
    /// on the spot and also reads as `None`.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let Some(session) = self.load(session_id).await? else {
            return Ok(None);
        };
        let now = self.clock.now();
        if session.is_expired_at(now) {
            if session.status != SessionStatus::Expired && session.status != SessionStatus::Closed {
                self.retire(session, SessionStatus::Expired).await?;
            }
            return Ok(None);
        }
        if !session.is_live_at(now) {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Fetch a record regardless of status, for history reads after close.
    pub async fn peek(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        self.load(session_id).await
    }

    /// Merge `update` into a live session and bump its activity timestamps.
    pub async fn update(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<Session, SessionError> {
        let mut session = self
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        if let Some(conversation_id) = update.conversation_id {
            session.conversation_id = Some(conversation_id);
        }
        if let Some(agent_type) = update.agent_type {
            session.agent_type = agent_type;
        }
        if let Some(context) = update.context {
            session.context.extend(context);
        }
        if let Some(metadata) = update.metadata {
            session.metadata.extend(metadata);
        }

        let now = self.clock.now();
        session.updated_at = now;
        session.last_activity_at = now;

        // Terminal statuses leave both indices.
        match update.status {
            Some(status @ (SessionStatus::Closed | SessionStatus::Expired)) => {
                self.retire(session.clone(), status).await?;
                session.status = status;
                tracing::info!(session_id, status = ?status, "Session retired by update");
            }
            Some(status) => {
                session.status = status;
                self.save(&session).await?;
            }
            None => self.save(&session).await?,
        }
        Ok(session)
    }

    /// Close a session and drop it from both indices.
    ///
    /// The record stays readable through [`Self::peek`] until its TTL lapses.
    /// Returns `false` if no record exists.
    pub async fn close(&self, session_id: &str) -> Result<bool, SessionError> {
        match self.load(session_id).await? {
            Some(session) => {
                self.retire(session, SessionStatus::Closed).await?;
                tracing::info!(session_id, "Session closed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove a session record and its index entries outright.
    pub async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        let existing = self.load(session_id).await?;
        let removed = self.store.delete(&session_key(session_id)).await?;
        if let Some(session) = existing {
            self.store
                .set_remove(&user_key(&session.user_id), session_id)
                .await?;
        }
        self.store.set_remove(SESSION_INDEX, session_id).await?;
        Ok(removed)
    }

    /// Bump `last_activity_at` only. Returns `false` if the session is gone.
    pub async fn touch(&self, session_id: &str) -> Result<bool, SessionError> {
        let Some(mut session) = self.get(session_id).await? else {
            return Ok(false);
        };
        session.last_activity_at = self.clock.now();
        self.save(&session).await?;
        Ok(true)
    }

    /// Hand a session to another agent type, recording the switch in context.
    pub async fn switch_agent(
        &self,
        session_id: &str,
        agent_type: AgentType,
        reason: Option<String>,
    ) -> Result<Session, SessionError> {
        let mut session = self
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let now = self.clock.now();
        let switch = AgentSwitch {
            from: session.agent_type,
            to: agent_type,
            reason,
            timestamp: now,
        };
        let entry = serde_json::to_value(&switch)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        match session.context.get_mut(AGENT_SWITCHES_KEY) {
            Some(serde_json::Value::Array(list)) => list.push(entry),
            _ => {
                session
                    .context
                    .insert(AGENT_SWITCHES_KEY.to_string(), serde_json::Value::Array(vec![entry]));
            }
        }

        session.agent_type = agent_type;
        session.updated_at = now;
        session.last_activity_at = now;
        self.save(&session).await?;

        tracing::info!(session_id, from = %switch.from, to = %agent_type, "Agent switched");
        Ok(session)
    }

    /// Live sessions of a user, oldest first. Dangling index entries are pruned.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>, SessionError> {
        let index = user_key(user_id);
        let ids = self.store.set_members(&index).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await? {
                Some(session) => sessions.push(session),
                None => self.store.set_remove(&index, &id).await?,
            }
        }
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    /// Ensure `user_id` owns a live session.
    pub async fn validate_access(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Session, SessionError> {
        let session = self
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if session.user_id != user_id {
            return Err(SessionError::Forbidden {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        Ok(session)
    }

    /// Number of sessions in the liveness index.
    pub async fn active_count(&self) -> Result<usize, SessionError> {
        Ok(self.store.set_members(SESSION_INDEX).await?.len())
    }

    /// One pass over the liveness index.
    ///
    /// Retires sessions past `expires_at` or idle longer than the idle
    /// timeout, and drops index entries whose record has vanished. A failure
    /// on one session is logged and the sweep moves on. Returns the number of
    /// sessions retired.
    pub async fn cleanup_expired(&self) -> Result<usize, SessionError> {
        let ids = self.store.set_members(SESSION_INDEX).await?;
        let now = self.clock.now();
        let idle_limit = self.config.idle_timeout_secs as i64;
        let mut retired = 0;

        for id in ids {
            match self.sweep_one(&id, now, idle_limit).await {
                Ok(true) => retired += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(session_id = %id, error = %err, "Session sweep failed for entry");
                }
            }
        }

        if retired > 0 {
            tracing::info!(retired, "Session sweep retired sessions");
        }
        Ok(retired)
    }

    async fn sweep_one(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        idle_limit: i64,
    ) -> Result<bool, SessionError> {
        let Some(session) = self.load(session_id).await? else {
            self.store.set_remove(SESSION_INDEX, session_id).await?;
            return Ok(false);
        };

        if session.is_expired_at(now) {
            self.retire(session, SessionStatus::Expired).await?;
            Ok(true)
        } else if session.idle_secs_at(now) > idle_limit {
            self.retire(session, SessionStatus::Closed).await?;
            Ok(true)
        } else if !session.is_live_at(now) {
            self.store.set_remove(SESSION_INDEX, session_id).await?;
            Ok(false)
        } else {
            Ok(false)
        }
    }

    /// Run [`Self::cleanup_expired`] every `interval` until cancelled.
    pub async fn run_cleanup_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.cleanup_expired().await {
                        tracing::warn!(error = %err, "Session cleanup sweep failed");
                    }
                }
            }
        }
        tracing::debug!("Session cleanup loop stopped");
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let Some(raw) = self.store.get(&session_key(session_id)).await? else {
            return Ok(None);
        };
        let session = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        let raw = serde_json::to_string(session)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store
            .set(&session_key(&session.session_id), &raw, Some(self.ttl_for(session)))
            .await?;
        Ok(())
    }

    /// Time left until `expires_at`, floored so retired records linger briefly.
    fn ttl_for(&self, session: &Session) -> Duration {
        let remaining = (session.expires_at - self.clock.now()).num_seconds();
        Duration::from_secs(remaining.max(60) as u64)
    }

    async fn retire(&self, mut session: Session, status: SessionStatus) -> Result<(), SessionError> {
        session.status = status;
        session.updated_at = self.clock.now();
        self.save(&session).await?;
        self.store
            .set_remove(&user_key(&session.user_id), &session.session_id)
            .await?;
        self.store
            .set_remove(SESSION_INDEX, &session.session_id)
            .await?;
        Ok(())
    }
}
