//! Sliding-window rate limiter over the shared store.
//!
//! Each `(client, route)` pair owns a sorted set of admission timestamps
//! under `rate_limit:{client}:{path}`. A decision trims entries older than the
//! window, counts what is left, and only records the new request when it is
//! admitted. Trim, count and add are separate store calls, so concurrent
//! requests can overshoot the limit slightly; this is a soft limit.

use std::sync::Arc;
use std::time::Duration;

use switchboard_types::error::StoreError;
use switchboard_types::rate_limit::{RateLimitInfo, RateLimitRule};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::store::SharedStore;

use super::policy::RoutePolicy;

const KEY_PREFIX: &str = "rate_limit:";

/// Store key for one client on one route.
pub fn window_key(client: &str, path: &str) -> String {
    format!("{KEY_PREFIX}{client}:{path}")
}

pub struct SlidingWindowRateLimiter<S: SharedStore> {
    store: Arc<S>,
    policy: RoutePolicy,
    clock: Arc<dyn Clock>,
}

impl<S: SharedStore> SlidingWindowRateLimiter<S> {
    pub fn new(store: Arc<S>, policy: RoutePolicy) -> Self {
        Self::with_clock(store, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, policy: RoutePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    /// Rule that applies to `path`, for response headers.
    pub fn rule_for(&self, path: &str) -> RateLimitRule {
        self.policy.resolve(path)
    }

    /// Admission decision for `client` on `path` under the route's rule.
    pub async fn check(&self, client: &str, path: &str) -> (bool, RateLimitInfo) {
        let rule = self.policy.resolve(path);
        self.allow(&window_key(client, path), rule.limit, rule.window_secs)
            .await
    }

    /// Admission decision for an arbitrary key.
    ///
    /// If the store cannot be reached the request is allowed and the failure
    /// logged: availability wins over strict limiting.
    pub async fn allow(&self, key: &str, limit: u64, window_secs: u64) -> (bool, RateLimitInfo) {
        let now = self.clock.now();
        let reset_at = now.timestamp() + window_secs as i64;

        match self.try_allow(key, limit, window_secs).await {
            Ok((allowed, current)) => {
                let info = RateLimitInfo {
                    limit,
                    current,
                    remaining: if allowed { limit.saturating_sub(current + 1) } else { 0 },
                    window: window_secs,
                    reset_at,
                };
                if !allowed {
                    tracing::debug!(key, limit, current, "Rate limit exceeded");
                }
                (allowed, info)
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "Rate limiter store failure, failing open");
                (
                    true,
                    RateLimitInfo {
                        limit,
                        current: 0,
                        remaining: limit,
                        window: window_secs,
                        reset_at,
                    },
                )
            }
        }
    }

    /// Returns `(allowed, requests already in the window)`.
    async fn try_allow(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
    ) -> Result<(bool, u64), StoreError> {
        let now = self.clock.now();
        let now_secs = now.timestamp_millis() as f64 / 1000.0;
        let window_start = now_secs - window_secs as f64;

        self.store
            .zrem_range_by_score(key, f64::MIN, window_start)
            .await?;
        let current = self.store.zcard(key).await?;
        if current >= limit {
            return Ok((false, current));
        }

        let member = format!("{}-{}", now.timestamp_millis(), Uuid::new_v4().simple());
        self.store.zadd(key, &member, now_secs).await?;
        self.store
            .expire(key, Duration::from_secs(window_secs.max(1)))
            .await?;
        Ok((true, current))
    }

    /// Forget the window for `client` on `path`.
    pub async fn reset(&self, client: &str, path: &str) -> Result<bool, StoreError> {
        self.store.delete(&window_key(client, path)).await
    }
}
