//! Per-session generation serialization.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hands out one permit per session at a time.
///
/// Waiters queue in FIFO order on the session's mutex. A session's entry is
/// dropped when the last permit holder releases it with nobody waiting.
#[derive(Debug, Default, Clone)]
pub struct GenerationGuard {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Exclusive right to generate for one session.
pub struct GenerationPermit {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other generation runs for `session_id`.
    pub async fn acquire(&self, session_id: &str) -> GenerationPermit {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        GenerationPermit {
            guard: Some(guard),
            session_id: session_id.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Sessions with a running or queued generation.
    pub fn active_sessions(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for GenerationPermit {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let lock = OwnedMutexGuard::mutex(&guard).clone();
        drop(guard);
        // Map entry plus our clone: nobody else is waiting.
        self.locks.remove_if(&self.session_id, |_, held| {
            Arc::ptr_eq(held, &lock) && Arc::strong_count(held) == 2
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_acquire_waits_for_first() {
        let guard = GenerationGuard::new();
        let first = guard.acquire("s1").await;

        let contender = {
            let guard = guard.clone();
            tokio::spawn(async move {
                let _permit = guard.acquire("s1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_sessions_do_not_block() {
        let guard = GenerationGuard::new();
        let _a = guard.acquire("s1").await;
        let _b = guard.acquire("s2").await;
        assert_eq!(guard.active_sessions(), 2);
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let guard = GenerationGuard::new();
        drop(guard.acquire("s1").await);
        assert_eq!(guard.active_sessions(), 0);
    }
}
