//! Persistent [`CacheStore`] implementation backed by [`redb`].
//!
//! Keys and values are MsgPack-encoded; expiry deadlines are stored as
//! wall-clock unix milliseconds so entries written before a restart still
//! expire on schedule. Opening the database is fallible; after that, I/O
//! failures are logged and degrade to a miss (reads) or a dropped write,
//! matching the behavior of an unavailable cache rather than poisoning the
//! caller.

use std::marker::PhantomData;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::cache::error::CacheError;
use crate::cache::store::CacheStore;

const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

#[derive(Serialize, Deserialize)]
struct StoredRecord<V> {
    value: V,
    expires_at_ms: Option<u64>,
}

impl<V> StoredRecord<V> {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |deadline| now_ms < deadline)
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// On-disk store for tables whose contents must survive a process restart.
///
/// Selected per table at creation time via
/// [`CacheRegistry::disk`](crate::cache::CacheRegistry::disk); everything
/// else about the table (sweeper, lazy expiry, close semantics) is identical
/// to the in-memory backend.
pub struct DiskStore<K, V> {
    db: Database,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> DiskStore<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Disk`] if the file cannot be opened or the
    /// entries table cannot be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db = Database::create(path)?;
        // Create the table up front so later read transactions never see
        // a missing table.
        let txn = db.begin_write()?;
        txn.open_table(ENTRIES)?;
        txn.commit()?;
        Ok(Self {
            db,
            _marker: PhantomData,
        })
    }

    fn try_put(&self, key: &K, value: &V, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at_ms = ttl
            .filter(|d| !d.is_zero())
            .map(|d| unix_millis().saturating_add(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)));
        let key_bytes = rmp_serde::to_vec(key)?;
        let record_bytes = rmp_serde::to_vec(&StoredRecord {
            value,
            expires_at_ms,
        })?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            table.insert(key_bytes.as_slice(), record_bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn try_get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let key_bytes = rmp_serde::to_vec(key)?;
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let Some(guard) = table.get(key_bytes.as_slice())? else {
            return Ok(None);
        };
        let record: StoredRecord<V> = rmp_serde::from_slice(guard.value())?;
        if record.is_live(unix_millis()) {
            Ok(Some(record.value))
        } else {
            Ok(None)
        }
    }

    fn try_remove(&self, key: &K) -> Result<(), CacheError> {
        let key_bytes = rmp_serde::to_vec(key)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            table.remove(key_bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn try_for_each(&self, f: &mut dyn FnMut(&K, &V) -> bool) -> Result<(), CacheError> {
        let now_ms = unix_millis();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        for pair in table.range::<&[u8]>(..)? {
            let (key_guard, value_guard) = pair.map_err(redb::Error::from)?;
            let record: StoredRecord<V> = rmp_serde::from_slice(value_guard.value())?;
            if !record.is_live(now_ms) {
                continue;
            }
            let key: K = rmp_serde::from_slice(key_guard.value())?;
            if !f(&key, &record.value) {
                break;
            }
        }
        Ok(())
    }

    fn try_sweep(&self) -> Result<(), CacheError> {
        let now_ms = unix_millis();
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            let mut expired: Vec<Vec<u8>> = Vec::new();
            for pair in table.range::<&[u8]>(..)? {
                let (key_guard, value_guard) = pair.map_err(redb::Error::from)?;
                // Records that no longer decode are treated as expired.
                let live = rmp_serde::from_slice::<StoredRecord<serde::de::IgnoredAny>>(
                    value_guard.value(),
                )
                .map_or(false, |record| record.is_live(now_ms));
                if !live {
                    expired.push(key_guard.value().to_vec());
                }
            }
            for key in expired {
                table.remove(key.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn try_clear(&self) -> Result<(), CacheError> {
        let txn = self.db.begin_write()?;
        txn.delete_table(ENTRIES)?;
        txn.open_table(ENTRIES)?;
        txn.commit()?;
        Ok(())
    }

    fn try_len(&self) -> Result<usize, CacheError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let len = table.len().map_err(redb::Error::from)?;
        Ok(usize::try_from(len).unwrap_or(usize::MAX))
    }
}

impl<K, V> CacheStore<K, V> for DiskStore<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn put(&self, key: K, value: V, ttl: Option<Duration>) {
        if let Err(err) = self.try_put(&key, &value, ttl) {
            error!(error = %err, "disk cache write failed");
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(err) => {
                error!(error = %err, "disk cache read failed");
                None
            }
        }
    }

    fn remove(&self, key: &K) {
        if let Err(err) = self.try_remove(key) {
            error!(error = %err, "disk cache delete failed");
        }
    }

    fn for_each(&self, f: &mut dyn FnMut(&K, &V) -> bool) {
        if let Err(err) = self.try_for_each(f) {
            error!(error = %err, "disk cache iteration failed");
        }
    }

    fn sweep(&self) {
        if let Err(err) = self.try_sweep() {
            error!(error = %err, "disk cache sweep failed");
        }
    }

    fn clear(&self) {
        if let Err(err) = self.try_clear() {
            error!(error = %err, "disk cache clear failed");
        }
    }

    fn len(&self) -> usize {
        match self.try_len() {
            Ok(len) => len,
            Err(err) => {
                error!(error = %err, "disk cache length check failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn temp_store(dir: &tempfile::TempDir) -> DiskStore<String, String> {
        DiskStore::open(dir.path().join("cache.redb")).expect("open disk store")
    }

    #[test]
    fn put_get_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir);

        store.put("a".to_string(), "1".to_string(), None);
        assert_eq!(store.get(&"a".to_string()), Some("1".to_string()));

        store.remove(&"a".to_string());
        assert_eq!(store.get(&"a".to_string()), None);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.redb");

        {
            let store: DiskStore<String, String> = DiskStore::open(&path).unwrap();
            store.put("persistent".to_string(), "yes".to_string(), None);
        }

        let reopened: DiskStore<String, String> = DiskStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(&"persistent".to_string()),
            Some("yes".to_string())
        );
    }

    #[test]
    fn expired_entry_is_invisible_and_swept() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir);

        store.put(
            "short".to_string(),
            "v".to_string(),
            Some(Duration::from_millis(30)),
        );
        store.put("forever".to_string(), "v".to_string(), None);
        assert_eq!(store.get(&"short".to_string()), Some("v".to_string()));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(store.get(&"short".to_string()), None);

        store.sweep();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"forever".to_string()), Some("v".to_string()));
    }

    #[test]
    fn for_each_visits_live_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir);

        store.put(
            "dead".to_string(),
            "x".to_string(),
            Some(Duration::from_millis(10)),
        );
        store.put("live".to_string(), "y".to_string(), None);
        std::thread::sleep(Duration::from_millis(40));

        let mut seen = Vec::new();
        store.for_each(&mut |key, value| {
            seen.push((key.clone(), value.clone()));
            true
        });
        assert_eq!(seen, vec![("live".to_string(), "y".to_string())]);
    }

    #[test]
    fn clear_empties_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir);

        store.put("a".to_string(), "1".to_string(), None);
        store.put("b".to_string(), "2".to_string(), None);
        store.clear();

        assert_eq!(store.len(), 0);
        assert_eq!(store.get(&"a".to_string()), None);
    }
}
