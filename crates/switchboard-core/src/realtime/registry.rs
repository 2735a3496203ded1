//! In-process registry of live transport connections.
//!
//! Tracks every socket, its authentication state, and its membership in the
//! per-session and per-user indices. Delivery goes through a bounded mpsc
//! channel drained by the socket's writer task; a closed or full channel is
//! a transport failure and tears the connection down.
//!
//! Nothing here is persisted. The registry never errors on unknown ids; it
//! reports booleans and counts so callers can degrade gracefully.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use switchboard_types::connection::ConnectionInfo;
use switchboard_types::realtime::OutboundEvent;

use crate::clock::{Clock, SystemClock};

/// Outbound half of a connection, owned by the registry.
pub type ConnectionSender = mpsc::Sender<OutboundEvent>;

struct ConnectionEntry {
    sender: ConnectionSender,
    info: ConnectionInfo,
}

/// Registry of live connections.
///
/// Lock discipline: a guard on one map is always dropped before another map
/// is touched.
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionEntry>,
    /// Session ID -> connection IDs bound to it.
    session_index: DashMap<String, HashSet<String>>,
    /// User ID -> connection IDs authenticated as that user.
    user_index: DashMap<String, HashSet<String>>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            connections: DashMap::new(),
            session_index: DashMap::new(),
            user_index: DashMap::new(),
            clock,
        }
    }

    /// Register a new, unauthenticated connection. Returns its id.
    pub fn register(&self, sender: ConnectionSender) -> String {
        let connection_id = Uuid::new_v4().to_string();
        let now = self.clock.now();
        let info = ConnectionInfo {
            connection_id: connection_id.clone(),
            authenticated: false,
            user_id: None,
            session_id: None,
            created_at: now,
            last_activity: now,
            metadata: HashMap::new(),
        };
        self.connections
            .insert(connection_id.clone(), ConnectionEntry { sender, info });
        tracing::info!(connection_id = %connection_id, "Connection registered");
        connection_id
    }

    /// Mark a connection authenticated as `user_id`, optionally binding it to
    /// a session. Returns `false` if the connection is unknown.
    ///
    /// Switching to a different user without naming a session leaves the
    /// previous user's session.
    pub fn authenticate(&self, connection_id: &str, user_id: &str, session_id: Option<&str>) -> bool {
        let previous_user = {
            let Some(mut entry) = self.connections.get_mut(connection_id) else {
                return false;
            };
            entry.info.authenticated = true;
            entry.info.user_id.replace(user_id.to_string())
        };

        let user_changed = match previous_user {
            Some(previous) if previous != user_id => {
                index_remove(&self.user_index, &previous, connection_id);
                true
            }
            _ => false,
        };
        index_add(&self.user_index, user_id, connection_id);

        match session_id {
            Some(session_id) => {
                self.bind_session(connection_id, session_id);
            }
            None if user_changed => {
                if let Some(left) = self.unbind_session(connection_id) {
                    tracing::debug!(connection_id, session_id = %left, "Re-authentication left previous user's session");
                }
            }
            None => {}
        }

        // Lost a race with disconnect: undo the index insert.
        if !self.connections.contains_key(connection_id) {
            index_remove(&self.user_index, user_id, connection_id);
            return false;
        }

        tracing::info!(connection_id, user_id, session_id, "Connection authenticated");
        true
    }

    /// Bind a connection to a session, leaving any previous session.
    pub fn bind_session(&self, connection_id: &str, session_id: &str) -> bool {
        let previous = {
            let Some(mut entry) = self.connections.get_mut(connection_id) else {
                return false;
            };
            entry.info.session_id.replace(session_id.to_string())
        };

        if let Some(previous) = previous.filter(|p| p != session_id) {
            index_remove(&self.session_index, &previous, connection_id);
        }
        index_add(&self.session_index, session_id, connection_id);

        if !self.connections.contains_key(connection_id) {
            index_remove(&self.session_index, session_id, connection_id);
            return false;
        }
        true
    }

    /// Detach a connection from its session. Returns the session it left.
    pub fn unbind_session(&self, connection_id: &str) -> Option<String> {
        let previous = self
            .connections
            .get_mut(connection_id)
            .and_then(|mut entry| entry.info.session_id.take())?;
        index_remove(&self.session_index, &previous, connection_id);
        Some(previous)
    }

    /// Best-effort delivery to one connection.
    ///
    /// On transport failure the connection is torn down and `false` returned.
    pub fn send(&self, connection_id: &str, event: OutboundEvent) -> bool {
        let Some(sender) = self
            .connections
            .get(connection_id)
            .map(|entry| entry.sender.clone())
        else {
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id, "Outbound queue full, dropping slow connection");
                self.disconnect(connection_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id, "Transport closed, removing connection");
                self.disconnect(connection_id);
                false
            }
        }
    }

    /// Deliver to every connection bound to `session_id` except `exclude`.
    /// Returns the number of successful deliveries.
    pub fn broadcast_to_session(
        &self,
        session_id: &str,
        event: &OutboundEvent,
        exclude: Option<&str>,
    ) -> usize {
        let targets = index_members(&self.session_index, session_id);
        self.deliver_all(targets, event, exclude)
    }

    /// Deliver to every connection of `user_id` except `exclude`.
    pub fn broadcast_to_user(
        &self,
        user_id: &str,
        event: &OutboundEvent,
        exclude: Option<&str>,
    ) -> usize {
        let targets = index_members(&self.user_index, user_id);
        self.deliver_all(targets, event, exclude)
    }

    /// Deliver to every connection, or only authenticated ones.
    pub fn broadcast(&self, event: &OutboundEvent, authenticated_only: bool) -> usize {
        let targets: Vec<String> = self
            .connections
            .iter()
            .filter(|entry| !authenticated_only || entry.info.authenticated)
            .map(|entry| entry.key().clone())
            .collect();
        self.deliver_all(targets, event, None)
    }

    fn deliver_all(&self, targets: Vec<String>, event: &OutboundEvent, exclude: Option<&str>) -> usize {
        targets
            .iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .filter(|id| self.send(id, event.clone()))
            .count()
    }

    /// Tear a connection down and remove it from every index.
    ///
    /// Idempotent: returns `false` if it was already gone.
    pub fn disconnect(&self, connection_id: &str) -> bool {
        let Some((_, entry)) = self.connections.remove(connection_id) else {
            return false;
        };
        if let Some(session_id) = &entry.info.session_id {
            index_remove(&self.session_index, session_id, connection_id);
        }
        if let Some(user_id) = &entry.info.user_id {
            index_remove(&self.user_index, user_id, connection_id);
        }
        tracing::info!(connection_id, "Connection removed");
        true
    }

    /// Snapshot of a connection.
    pub fn get_connection(&self, connection_id: &str) -> Option<ConnectionInfo> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.info.clone())
    }

    /// Record inbound activity on a connection.
    pub fn touch(&self, connection_id: &str) -> bool {
        let now = self.clock.now();
        match self.connections.get_mut(connection_id) {
            Some(mut entry) => {
                entry.info.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Attach a metadata entry to a connection.
    pub fn set_metadata(&self, connection_id: &str, key: &str, value: serde_json::Value) -> bool {
        match self.connections.get_mut(connection_id) {
            Some(mut entry) => {
                entry.info.metadata.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn session_connections(&self, session_id: &str) -> Vec<String> {
        index_members(&self.session_index, session_id)
    }

    pub fn user_connections(&self, user_id: &str) -> Vec<String> {
        index_members(&self.user_index, user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn authenticated_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.info.authenticated)
            .count()
    }

    /// Push a heartbeat to every connection. Returns how many were torn down.
    ///
    /// Only a full buffer or a closed channel counts as dead here. A broken
    /// socket shows up once its writer task fails a write and drops the
    /// receiver, so detection lags one heartbeat behind.
    pub fn heartbeat_once(&self) -> usize {
        let ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        let heartbeat = OutboundEvent::heartbeat();
        let failed = ids
            .iter()
            .filter(|id| !self.send(id, heartbeat.clone()))
            .count();
        if failed > 0 {
            tracing::info!(failed, "Heartbeat removed dead connections");
        }
        failed
    }

    /// Disconnect every connection idle for longer than `timeout`.
    pub fn sweep_idle(&self, timeout: Duration) -> usize {
        let now = self.clock.now();
        let limit = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let stale: Vec<String> = self
            .connections
            .iter()
            .filter(|entry| now - entry.info.last_activity > limit)
            .map(|entry| entry.key().clone())
            .collect();

        let removed = stale.iter().filter(|id| self.disconnect(id)).count();
        if removed > 0 {
            tracing::info!(removed, "Idle sweep removed connections");
        }
        removed
    }

    /// Run [`Self::heartbeat_once`] every `interval` until cancelled.
    pub async fn run_heartbeat_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.heartbeat_once();
                }
            }
        }
        tracing::debug!("Heartbeat loop stopped");
    }

    /// Run [`Self::sweep_idle`] every `interval` until cancelled.
    pub async fn run_idle_sweep_loop(
        self: Arc<Self>,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_idle(timeout);
                }
            }
        }
        tracing::debug!("Idle sweep loop stopped");
    }

    /// Drop every connection. Writer tasks see their channel close and exit.
    pub fn shutdown(&self) {
        let count = self.connections.len();
        self.connections.clear();
        self.session_index.clear();
        self.user_index.clear();
        tracing::info!(count, "Connection registry shut down");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn index_add(index: &DashMap<String, HashSet<String>>, key: &str, connection_id: &str) {
    index
        .entry(key.to_string())
        .or_default()
        .insert(connection_id.to_string());
}

fn index_remove(index: &DashMap<String, HashSet<String>>, key: &str, connection_id: &str) {
    if let Some(mut members) = index.get_mut(key) {
        members.remove(connection_id);
    }
    index.remove_if(key, |_, members| members.is_empty());
}

fn index_members(index: &DashMap<String, HashSet<String>>, key: &str) -> Vec<String> {
    index
        .get(key)
        .map(|members| members.iter().cloned().collect())
        .unwrap_or_default()
}
