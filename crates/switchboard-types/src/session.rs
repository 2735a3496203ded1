//! Ephemeral session types.
//!
//! A [`Session`] ties one user to a conversation and to the agent currently
//! serving it. Sessions live in the shared key-value store with a TTL; they are
//! not database rows.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who is currently answering in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Ai,
    Human,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentType::Ai => write!(f, "ai"),
            AgentType::Human => write!(f, "human"),
        }
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ai" => Ok(AgentType::Ai),
            "human" => Ok(AgentType::Human),
            other => Err(format!("invalid agent type: '{other}'")),
        }
    }
}

impl Default for AgentType {
    fn default() -> Self {
        AgentType::Ai
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Closed,
    Expired,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Closed => write!(f, "closed"),
            SessionStatus::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "idle" => Ok(SessionStatus::Idle),
            "closed" => Ok(SessionStatus::Closed),
            "expired" => Ok(SessionStatus::Expired),
            other => Err(format!("invalid session status: '{other}'")),
        }
    }
}

/// Ephemeral conversational state.
///
/// A session whose status is `Closed` or whose `expires_at` has passed is
/// treated as absent by every reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub agent_type: AgentType,
    pub status: SessionStatus,
    /// Small working state, e.g. `agent_switches`.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// True once the hard lifetime has run out.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// True if readers may treat this session as present.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status != SessionStatus::Closed
            && self.status != SessionStatus::Expired
            && !self.is_expired_at(now)
    }

    /// Seconds since the last recorded activity.
    pub fn idle_secs_at(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_activity_at).num_seconds()
    }
}

/// Partial update applied by `SessionStore::update`.
///
/// `None` fields are left untouched. Map fields are merged key by key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub agent_type: Option<AgentType>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub context: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// One entry of the `agent_switches` list kept in session context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSwitch {
    pub from: AgentType,
    pub to: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}
