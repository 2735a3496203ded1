//! Sliding-window rate limit types.

use serde::{Deserialize, Serialize};

/// A `limit` requests per `window_secs` admission rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub limit: u64,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub const fn new(limit: u64, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }
}

/// Quota snapshot returned with every admission decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    /// Requests counted in the window before this decision.
    pub current: u64,
    pub remaining: u64,
    pub window: u64,
    /// Unix timestamp (seconds) when the window has fully rolled over.
    pub reset_at: i64,
}

/// Per-route override in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimit {
    pub path: String,
    pub limit: u64,
    pub window_secs: u64,
}

impl RouteLimit {
    pub fn rule(&self) -> RateLimitRule {
        RateLimitRule::new(self.limit, self.window_secs)
    }
}
