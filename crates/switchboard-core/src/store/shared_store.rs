//! Shared key-value store trait.
//!
//! The session store and rate limiter keep all of their state behind this
//! interface so several process instances can share it. Implementations live
//! in `switchboard-infra` (SQLite) and in [`super::memory`].

use std::future::Future;
use std::time::Duration;

use switchboard_types::error::StoreError;

/// Key-value store with plain values, unordered sets and scored sets.
///
/// Every operation is independently atomic; there are no multi-key
/// transactions, so callers get last-writer-wins semantics across keys.
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait SharedStore: Send + Sync {
    /// Get a value. Expired keys read as `None`.
    fn get(&self, key: &str)
    -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Set a value (upsert), optionally with a time-to-live.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete a key of any kind. Returns whether something was removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Set or refresh the time-to-live of an existing key of any kind.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Add a member to a set. No-op if already present.
    fn set_add(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a member from a set. No-op if absent.
    fn set_remove(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// All members of a set, in no particular order.
    fn set_members(&self, key: &str)
    -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Add (or rescore) a member of a sorted set.
    fn zadd(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove sorted-set members with `min <= score <= max`. Returns the count removed.
    fn zrem_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Number of members in a sorted set.
    fn zcard(&self, key: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Cheap liveness check.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
