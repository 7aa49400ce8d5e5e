//! [`TtlCache`]: a named expiring table with its own background sweeper.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::cache::store::CacheStore;

/// How often a table's sweeper wakes to drop expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A named expiring key-value table.
///
/// Owns a [`CacheStore`] backend and one background sweeper task that
/// periodically removes expired entries. Reads re-check expiry themselves,
/// so the sweeper only bounds memory, never correctness.
///
/// Tables are created through
/// [`CacheRegistry`](crate::cache::CacheRegistry) and shared as
/// `Arc<TtlCache<K, V>>`. Construction must happen inside a tokio runtime
/// (the sweeper is spawned immediately).
///
/// After [`close`](TtlCache::close) the table must not be used.
pub struct TtlCache<K, V> {
    name: String,
    store: Arc<dyn CacheStore<K, V>>,
    stop: watch::Sender<bool>,
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("len", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates the table and spawns its sweeper.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn CacheStore<K, V>>,
        sweep_interval: Duration,
    ) -> Self {
        let name = name.into();
        let (stop, mut stopped) = watch::channel(false);
        let sweeper_store = Arc::clone(&store);
        let table_name = name.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh table is
            // not swept at creation time.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweeper_store.sweep(),
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            debug!(table = %table_name, "cache sweeper stopped");
                            break;
                        }
                    }
                }
            }
        });
        Self { name, store, stop }
    }

    /// The table's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace an entry. `ttl` of `None` or zero means the entry
    /// never expires.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        self.store.put(key, value, ttl);
    }

    /// Retrieve a live entry, re-checking expiry at call time.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.store.get(key)
    }

    /// Remove an entry.
    pub fn delete(&self, key: &K) {
        self.store.remove(key);
    }

    /// Visit live entries; stop early when `f` returns `false`.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.store.for_each(&mut f);
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Stops the sweeper and clears the table. Using the table afterwards
    /// is undefined behavior at the API contract level (entries are gone and
    /// nothing sweeps new ones).
    pub fn close(&self) {
        // Receiver may already be gone; nothing to do then.
        let _ = self.stop.send(true);
        self.store.clear();
    }
}
