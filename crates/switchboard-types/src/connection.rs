//! Read-only snapshot of a live transport connection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of a connection held by the registry.
///
/// The registry owns the live record together with its transport handle;
/// callers only ever see these copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Short prefix of a connection id, used to derive guest user ids.
pub fn short_id(connection_id: &str) -> &str {
    match connection_id.char_indices().nth(8) {
        Some((idx, _)) => &connection_id[..idx],
        None => connection_id,
    }
}
