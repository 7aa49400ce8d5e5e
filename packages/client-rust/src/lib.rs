//! `microcall` client — service discovery, cached resolution with push
//! refresh, and an HTTP RPC client with bounded failover.
//!
//! The pieces, leaves first: a [`Registry`] answers "who serves X right
//! now"; the [`ServiceResolver`] caches those answers in
//! `microcall-core` tables and keeps them fresh through push
//! subscriptions; the [`RpcClient`] resolves, attaches the calling unit's
//! ambient headers, and retries a refused connection exactly once against
//! a re-resolved address. [`AppContext`] wires all of it together at
//! startup.

pub mod app;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod resolver;

pub use app::{AppContext, AppContextBuilder};
pub use client::{CallOptions, FileUpload, Protocol, RpcClient};
pub use config::{ClientConfig, DEFAULT_GROUP};
pub use error::{RegistryError, RpcError};
pub use models::{ApiResult, Page, ServiceInstance};
pub use registry::{HttpRegistry, HttpRegistryConfig, MemoryRegistry, Registry};
pub use resolver::ServiceResolver;
