//! `microcall` core — expiring cache engine and pseudo-task-local request
//! context, the in-process foundation the RPC client builds on.

pub mod cache;
pub mod context;

#[cfg(feature = "disk-cache")]
pub use cache::DiskStore;
pub use cache::{CacheError, CacheRegistry, CacheStore, MemoryStore, TtlCache};
pub use context::{ContextStore, UnitId};
