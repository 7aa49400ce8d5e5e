//! In-memory [`CacheStore`] implementation backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking. Expiry
//! deadlines use [`tokio::time::Instant`], so tests running under paused
//! tokio time control the clock.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::cache::store::CacheStore;

struct StoredEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> StoredEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// In-memory store backed by [`DashMap`] for fine-grained sharded access.
///
/// Values are cloned out on read, so `V` is typically small (strings, maps
/// of headers, host lists).
pub struct MemoryStore<K, V> {
    entries: DashMap<K, StoredEntry<V>>,
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash,
{
    /// Creates a new, empty `MemoryStore`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> Default for MemoryStore<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheStore<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn put(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = ttl
            .filter(|d| !d.is_zero())
            .map(|d| Instant::now() + d);
        self.entries.insert(key, StoredEntry { value, expires_at });
    }

    fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    fn for_each(&self, f: &mut dyn FnMut(&K, &V) -> bool) {
        let now = Instant::now();
        // Snapshot first so `f` may touch the store without deadlocking on
        // a shard lock.
        let live: Vec<(K, V)> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect();
        for (key, value) in &live {
            if !f(key, value) {
                break;
            }
        }
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
