// src/cache.rs
//! First history page per user.
//!
//! A reader that loaded rows before an invalidation must not write them back
//! afterwards. Each invalidation bumps the user's generation, and an insert
//! only lands when the generation it started from is still current.

use crate::models::LedgerEntry;
use moka::future::Cache;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct HistoryCache {
    entries: Cache<Uuid, Vec<LedgerEntry>>,
    generations: Mutex<HashMap<Uuid, u64>>,
}

impl HistoryCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            generations: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, user_id: Uuid) -> Option<Vec<LedgerEntry>> {
        self.entries.get(&user_id).await
    }

    /// Read before loading from the store; hand it back to `insert`.
    pub async fn generation(&self, user_id: Uuid) -> u64 {
        self.generations
            .lock()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns false when the user was invalidated since `generation` was read.
    pub async fn insert(&self, user_id: Uuid, generation: u64, rows: Vec<LedgerEntry>) -> bool {
        let generations = self.generations.lock().await;
        if generations.get(&user_id).copied().unwrap_or(0) != generation {
            tracing::debug!(%user_id, "history changed during load, not caching");
            return false;
        }
        self.entries.insert(user_id, rows).await;
        true
    }

    pub async fn invalidate(&self, user_id: Uuid) {
        let mut generations = self.generations.lock().await;
        *generations.entry(user_id).or_insert(0) += 1;
        self.entries.invalidate(&user_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger;

    fn cache() -> HistoryCache {
        HistoryCache::new(16, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn insert_after_invalidation_is_dropped() {
        let cache = cache();
        let user = Uuid::new_v4();
        let stale = vec![ledger::earned(user, 100, ledger::SIGNUP_REASON)];

        let generation = cache.generation(user).await;
        cache.invalidate(user).await;

        assert!(!cache.insert(user, generation, stale).await);
        assert!(cache.get(user).await.is_none());
    }

    #[tokio::test]
    async fn current_generation_is_cached() {
        let cache = cache();
        let user = Uuid::new_v4();
        cache.invalidate(user).await;

        let generation = cache.generation(user).await;
        let rows = vec![ledger::earned(user, 5, "grant")];
        assert!(cache.insert(user, generation, rows.clone()).await);
        assert_eq!(cache.get(user).await, Some(rows));

        cache.invalidate(user).await;
        assert!(cache.get(user).await.is_none());
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = HistoryCache::new(16, Duration::from_millis(50));
        let user = Uuid::new_v4();
        let generation = cache.generation(user).await;
        cache
            .insert(user, generation, vec![ledger::earned(user, 1, "grant")])
            .await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get(user).await.is_none());
    }
}
