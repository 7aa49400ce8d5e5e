//! Expiring key-value cache engine.
//!
//! One canonical abstraction serves every table in the process:
//!
//! - [`CacheStore`]: the backend trait (put/get/remove/iterate/sweep)
//! - [`MemoryStore`]: `DashMap`-backed backend
//! - [`DiskStore`]: `redb`-backed persistent backend (feature `disk-cache`)
//! - [`TtlCache`]: a named table handle with its background sweeper
//! - [`CacheRegistry`]: lazy name-to-table map, closed once at shutdown
//!
//! Expiry is enforced lazily on every read *and* actively by the sweeper,
//! so a just-expired entry is never observable regardless of sweep timing.

#[cfg(feature = "disk-cache")]
pub mod disk;
pub mod error;
pub mod memory;
pub mod registry;
pub mod store;
pub mod table;

#[cfg(feature = "disk-cache")]
pub use disk::DiskStore;
pub use error::CacheError;
pub use memory::MemoryStore;
pub use registry::CacheRegistry;
pub use store::CacheStore;
pub use table::{TtlCache, DEFAULT_SWEEP_INTERVAL};
