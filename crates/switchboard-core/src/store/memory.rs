//! In-process [`SharedStore`] backed by `dashmap`.
//!
//! Used for single-instance deployments (`store.url = "memory://"`) and as
//! the fake in tests. State is lost on restart.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use switchboard_types::error::StoreError;

use super::SharedStore;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Dashmap-backed shared store with lazy TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Remove `key` if its TTL has passed.
    fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::Query(format!("key '{key}' holds a different type"))
    }
}

impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.evict_if_expired(key);
        match self.entries.get(key).map(|e| e.value.clone()) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut entry = Entry::new(Value::Str(value.to_string()));
        entry.expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.evict_if_expired(key);
        Ok(self.entries.remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.evict_if_expired(key);
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.evict_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(HashSet::new())));
        match &mut entry.value {
            Value::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.evict_if_expired(key);
        let emptied = match self.entries.get_mut(key) {
            None => return Ok(()),
            Some(mut entry) => match &mut entry.value {
                Value::Set(set) => {
                    set.remove(member);
                    set.is_empty()
                }
                _ => return Err(Self::wrong_type(key)),
            },
        };
        if emptied {
            self.entries
                .remove_if(key, |_, e| matches!(&e.value, Value::Set(s) if s.is_empty()));
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.evict_if_expired(key);
        match self.entries.get(key).map(|e| e.value.clone()) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.into_iter().collect()),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.evict_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::ZSet(HashMap::new())));
        match &mut entry.value {
            Value::ZSet(zset) => {
                zset.insert(member.to_string(), score);
                Ok(())
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        self.evict_if_expired(key);
        match self.entries.get_mut(key) {
            None => Ok(0),
            Some(mut entry) => match &mut entry.value {
                Value::ZSet(zset) => {
                    let before = zset.len();
                    zset.retain(|_, score| *score < min || *score > max);
                    Ok((before - zset.len()) as u64)
                }
                _ => Err(Self::wrong_type(key)),
            },
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        self.evict_if_expired(key);
        match self.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::ZSet(zset) => Ok(zset.len() as u64),
                _ => Err(Self::wrong_type(key)),
            },
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
