//! The [`CacheStore`] trait: the single expiring-map abstraction behind
//! every named cache table.
//!
//! Backends provide key-value storage with per-entry TTL. Expiry is enforced
//! twice: lazily by `get`/`for_each` at call time, and actively by the
//! table's background sweeper calling `sweep`. An entry is observable iff it
//! has no deadline or the deadline has not yet passed, so a just-expired key
//! is never returned even before the sweeper runs.

use std::time::Duration;

/// Typed key-value storage with per-entry expiry.
///
/// All operations take `&self` and must be safe for unsynchronized
/// concurrent use; implementations are shared as `Arc<dyn CacheStore>`
/// between foreground callers and the background sweeper.
pub trait CacheStore<K, V>: Send + Sync {
    /// Insert or replace an entry. A `ttl` of `None` or zero means the
    /// entry never expires.
    fn put(&self, key: K, value: V, ttl: Option<Duration>);

    /// Retrieve a live entry, or `None` if absent or expired.
    ///
    /// Implementations must re-check expiry here regardless of when the
    /// sweeper last ran.
    fn get(&self, key: &K) -> Option<V>;

    /// Remove an entry by key.
    fn remove(&self, key: &K);

    /// Visit every live entry. Expired entries are skipped. Iteration stops
    /// early when `f` returns `false`.
    fn for_each(&self, f: &mut dyn FnMut(&K, &V) -> bool);

    /// Drop every entry whose deadline has passed. Called periodically by
    /// the table sweeper.
    fn sweep(&self);

    /// Remove all entries.
    fn clear(&self);

    /// Number of stored entries, including not-yet-swept expired ones.
    fn len(&self) -> usize;

    /// Whether the store holds no entries at all.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
