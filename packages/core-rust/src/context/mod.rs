//! Pseudo-task-local request context.
//!
//! See [`ContextStore`] for the storage model and [`UnitId`] for how the
//! current concurrent unit is identified.

pub mod store;
pub mod unit;

pub use store::{ContextStore, DEFAULT_LANGUAGE, HEADER_TABLE, LANG_TABLE};
pub use unit::UnitId;

/// Well-known header names recognized by the context layer.
pub mod header {
    /// Trace id propagated across service hops.
    pub const REQUEST_ID: &str = "X-Request-Id";
    /// Resolved client IP.
    pub const REAL_IP: &str = "X-Real-IP";
    /// Proxy-supplied client IP, preferred over [`REAL_IP`] when present.
    pub const FORWARDED_FOR: &str = "X-Forwarded-For";
    /// Normalized user agent.
    pub const USER_AGENT: &str = "X-User-Agent";
    /// The raw inbound user agent header.
    pub const RAW_USER_AGENT: &str = "User-Agent";
    /// Requested response language.
    pub const LANG: &str = "X-Lang";
    /// Per-call timeout override, in whole seconds.
    pub const TIMEOUT: &str = "X-Timeout";
}
