use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{QuotaKey, QuotaStore, StoreError};

/// Number of increment calls between two sweeps of expired counters.
const PURGE_INTERVAL: usize = 1024;

#[derive(Debug)]
struct Counter {
    value: u64,
    expires_at: Instant,
}

impl Counter {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct Counters {
    entries: HashMap<QuotaKey, Counter>,
    writes: usize,
}

impl Counters {
    /// Drops expired counters every [`PURGE_INTERVAL`] writes.
    fn maybe_purge(&mut self, now: Instant) {
        self.writes += 1;
        if self.writes >= PURGE_INTERVAL {
            self.writes = 0;
            self.entries.retain(|_, counter| counter.is_live(now));
        }
    }
}

/// A [`QuotaStore`] that keeps counters in process memory.
///
/// Clones share the same counters, so one store can be handed to many tasks. Expired counters read
/// as zero and are swept out periodically on writes. The store never fails.
///
/// This is only correct when a single process enforces quotas.
#[derive(Clone, Debug, Default)]
pub struct MemoryQuotaStore {
    counters: Arc<Mutex<Counters>>,
}

impl MemoryQuotaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live counters.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.counters
            .lock()
            .entries
            .values()
            .filter(|counter| counter.is_live(now))
            .count()
    }

    /// Returns `true` if there is no live counter.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QuotaStore for MemoryQuotaStore {
    async fn increment_with_expiry(
        &self,
        keys: &[QuotaKey],
        ttl_seconds: u64,
    ) -> Result<Vec<u64>, StoreError> {
        let now = Instant::now();
        let expires_at = now + Duration::from_secs(ttl_seconds);

        let mut counters = self.counters.lock();
        counters.maybe_purge(now);

        let counts = keys
            .iter()
            .map(|key| {
                let counter = counters.entries.entry(key.clone()).or_insert(Counter {
                    value: 0,
                    expires_at,
                });

                if !counter.is_live(now) {
                    counter.value = 0;
                }
                counter.value += 1;
                counter.expires_at = expires_at;
                counter.value
            })
            .collect();

        Ok(counts)
    }

    async fn multi_get(&self, keys: &[QuotaKey]) -> Result<Vec<u64>, StoreError> {
        let now = Instant::now();
        let counters = self.counters.lock();

        Ok(keys
            .iter()
            .map(|key| match counters.entries.get(key) {
                Some(counter) if counter.is_live(now) => counter.value,
                _ => 0,
            })
            .collect())
    }

    async fn delete(&self, keys: &[QuotaKey]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut counters = self.counters.lock();

        let mut deleted = 0;
        for key in keys {
            if let Some(counter) = counters.entries.remove(key)
                && counter.is_live(now)
            {
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::{EndpointCategory, QuotaKeySpace};

    fn keys(user_id: &str) -> (QuotaKey, QuotaKey) {
        let now: DateTime<Utc> = "2024-06-01T10:00:00Z".parse().unwrap();
        let key_space = QuotaKeySpace::default();
        (
            key_space.key_for(user_id, EndpointCategory::Api, now).0,
            key_space.key_for(user_id, EndpointCategory::Total, now).0,
        )
    }

    #[tokio::test]
    async fn test_increment_and_read() {
        let store = MemoryQuotaStore::new();
        let (api, total) = keys("u1");

        let counts = store
            .increment_with_expiry(&[api.clone(), total.clone()], 60)
            .await
            .unwrap();
        assert_eq!(counts, [1, 1]);

        assert_eq!(store.increment_one(&api, 60).await.unwrap(), 2);

        let values = store.multi_get(&[api, total, keys("u2").0]).await.unwrap();
        assert_eq!(values, [2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_expire() {
        let store = MemoryQuotaStore::new();
        let (api, _) = keys("u1");

        store.increment_one(&api, 5).await.unwrap();
        store.increment_one(&api, 5).await.unwrap();
        assert_eq!(store.len(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.is_empty());
        assert_eq!(store.multi_get(std::slice::from_ref(&api)).await.unwrap(), [0]);

        // An expired counter starts over.
        assert_eq!(store.increment_one(&api, 5).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryQuotaStore::new();
        let (api, total) = keys("u1");

        store
            .increment_with_expiry(&[api.clone(), total.clone()], 60)
            .await
            .unwrap();

        assert_eq!(store.delete(std::slice::from_ref(&api)).await.unwrap(), 1);
        assert_eq!(store.delete(&[api.clone(), total.clone()]).await.unwrap(), 1);
        assert_eq!(store.multi_get(&[api, total]).await.unwrap(), [0, 0]);
    }

    #[tokio::test]
    async fn test_clones_share_counters() {
        let store = MemoryQuotaStore::new();
        let clone = store.clone();
        let (api, _) = keys("u1");

        store.increment_one(&api, 60).await.unwrap();
        assert_eq!(clone.increment_one(&api, 60).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_counters_are_purged() {
        let store = MemoryQuotaStore::new();
        let key_space = QuotaKeySpace::default();
        let mut now: DateTime<Utc> = "2024-06-01T10:00:00Z".parse().unwrap();

        for _ in 0..30 {
            for user in 0..100 {
                let (key, _) = key_space.key_for(&format!("u{user}"), EndpointCategory::Api, now);
                store.increment_one(&key, 60).await.unwrap();
            }
            now += chrono::Duration::days(1);
            tokio::time::advance(Duration::from_secs(120)).await;
        }

        assert!(store.is_empty());
        assert!(store.counters.lock().entries.len() < PURGE_INTERVAL);

        let (key, _) = key_space.key_for("fresh", EndpointCategory::Api, now);
        for _ in 0..PURGE_INTERVAL {
            store.increment_one(&key, 60).await.unwrap();
        }

        assert_eq!(store.counters.lock().entries.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
