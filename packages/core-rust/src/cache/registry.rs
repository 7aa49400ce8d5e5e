//! [`CacheRegistry`]: the process-wide set of named cache tables.
//!
//! One registry is constructed at startup and handed to every component
//! that needs cache access; there is no ambient global. Tables are created
//! lazily on first reference to their name and live until
//! [`close_all`](CacheRegistry::close_all).

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::cache::error::CacheError;
use crate::cache::memory::MemoryStore;
use crate::cache::table::{TtlCache, DEFAULT_SWEEP_INTERVAL};

/// Type-erased handle used for bulk shutdown.
trait AnyTable: Send + Sync {
    fn close(&self);
}

impl<K, V> AnyTable for TtlCache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn close(&self) {
        TtlCache::close(self);
    }
}

/// Two views of the same table: a closable handle and an `Any` handle for
/// typed downcast retrieval.
struct TableSlot {
    table: Arc<dyn AnyTable>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Name-keyed collection of [`TtlCache`] tables, each independently
/// synchronized and swept.
///
/// `memory`/`disk` are idempotent get-or-create: the first call for a name
/// creates the table and starts its sweeper, later calls return the same
/// instance. Requesting an existing name at a different key/value type is
/// a [`CacheError::TypeMismatch`].
pub struct CacheRegistry {
    sweep_interval: Duration,
    tables: DashMap<String, TableSlot>,
}

impl CacheRegistry {
    /// Creates a registry whose tables sweep at the default interval.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Creates a registry with a custom sweep interval for all tables.
    #[must_use]
    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            sweep_interval,
            tables: DashMap::new(),
        }
    }

    /// Gets or creates an in-memory table.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::TypeMismatch`] if `name` already refers to a
    /// table with different key/value types.
    pub fn memory<K, V>(&self, name: &str) -> Result<Arc<TtlCache<K, V>>, CacheError>
    where
        K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let typed = {
            let slot = self.tables.entry(name.to_string()).or_insert_with(|| {
                let cache: Arc<TtlCache<K, V>> = Arc::new(TtlCache::new(
                    name,
                    Arc::new(MemoryStore::new()),
                    self.sweep_interval,
                ));
                TableSlot {
                    table: cache.clone(),
                    typed: cache,
                }
            });
            Arc::clone(&slot.typed)
        };
        typed
            .downcast::<TtlCache<K, V>>()
            .map_err(|_| CacheError::TypeMismatch {
                name: name.to_string(),
            })
    }

    /// Gets or creates a disk-backed table persisted at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Disk`] if the database cannot be opened, or
    /// [`CacheError::TypeMismatch`] on a type conflict with an existing
    /// table of the same name.
    #[cfg(feature = "disk-cache")]
    pub fn disk<K, V>(
        &self,
        name: &str,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Arc<TtlCache<K, V>>, CacheError>
    where
        K: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
        V: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        match self.tables.entry(name.to_string()) {
            Entry::Occupied(slot) => slot
                .get()
                .typed
                .clone()
                .downcast::<TtlCache<K, V>>()
                .map_err(|_| CacheError::TypeMismatch {
                    name: name.to_string(),
                }),
            Entry::Vacant(vacant) => {
                let store = crate::cache::disk::DiskStore::open(path)?;
                let cache: Arc<TtlCache<K, V>> =
                    Arc::new(TtlCache::new(name, Arc::new(store), self.sweep_interval));
                vacant.insert(TableSlot {
                    table: cache.clone(),
                    typed: cache.clone(),
                });
                Ok(cache)
            }
        }
    }

    /// Number of created tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether any table has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Closes every table (stopping sweepers, clearing entries) and forgets
    /// them. Called once during graceful shutdown.
    pub fn close_all(&self) {
        for slot in self.tables.iter() {
            slot.table.close();
        }
        self.tables.clear();
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}
