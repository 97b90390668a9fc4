// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! In-process TTL+LRU caches, one per semantic namespace (K-metric 30s, API-key 5min, wallet 1h,
//! token 5min, static files 5min). A periodic cleanup sweep removes expired entries; see
//! [`TtlCache::sweep_expired`].

use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

struct Entry<V> {
    value: V,
    expires_at: Instant,
    last_used: AtomicU64,
}

/// A TTL cache with approximate LRU eviction: reads bump a logical clock on the entry, and
/// eviction (triggered once `capacity` is exceeded) drops the stalest entries first. Backed by
/// [`DashMap`] for lock-free concurrent reads, the same primitive the Wallet Indexer uses for its
/// per-wallet single-flight semaphores.
pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
    capacity: usize,
    clock: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        TtlCache {
            entries: DashMap::new(),
            ttl,
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.expires_at < Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry
            .last_used
            .store(self.clock.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
            last_used: AtomicU64::new(self.clock.fetch_add(1, Ordering::Relaxed)),
        };
        self.entries.insert(key, entry);

        if self.entries.len() > self.capacity {
            self.evict_stalest();
        }
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Periodic cleanup sweep: removes all expired entries regardless of capacity pressure.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at >= now);
    }

    fn evict_stalest(&self) {
        let stalest = self
            .entries
            .iter()
            .min_by_key(|e| e.last_used.load(Ordering::Relaxed))
            .map(|e| e.key().clone());
        if let Some(key) = stalest {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn get_after_expiry_returns_none() {
        let cache = TtlCache::new(Duration::from_millis(10), 10);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn capacity_evicts_stalest_entry() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.get(&"a"); // bump a's recency
        cache.insert("c", 3); // should evict b, the stalest
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn sweep_expired_removes_stale_entries() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_millis(10), 10);
        cache.insert("a", 1);
        sleep(Duration::from_millis(20));
        cache.sweep_expired();
        assert!(cache.is_empty());
    }
}
