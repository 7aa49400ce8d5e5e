//! Error type for cache table creation and the disk backend.

use thiserror::Error;

/// Failures raised by the cache layer.
///
/// Steady-state reads and writes on an open table are infallible from the
/// caller's perspective (disk I/O problems degrade to misses and are
/// logged); these errors surface only when creating tables or when an entry
/// cannot be encoded.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The embedded database rejected an operation.
    #[cfg(feature = "disk-cache")]
    #[error("disk cache failure: {0}")]
    Disk(#[source] Box<redb::Error>),

    /// A key or value could not be MsgPack-encoded.
    #[error("cache entry encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A stored record could not be decoded back.
    #[error("cache entry decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A table name was re-requested with a different key or value type.
    #[error("cache table `{name}` is already registered with a different entry type")]
    TypeMismatch {
        /// The conflicting table name.
        name: String,
    },
}

#[cfg(feature = "disk-cache")]
mod disk_conversions {
    use super::CacheError;

    macro_rules! from_redb {
        ($($err:ty),+ $(,)?) => {$(
            impl From<$err> for CacheError {
                fn from(err: $err) -> Self {
                    CacheError::Disk(Box::new(redb::Error::from(err)))
                }
            }
        )+};
    }

    from_redb!(
        redb::Error,
        redb::DatabaseError,
        redb::TransactionError,
        redb::TableError,
        redb::StorageError,
        redb::CommitError,
    );
}
