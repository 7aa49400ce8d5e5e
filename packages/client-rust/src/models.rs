//! Wire-level data shared by the registry, resolver, and client.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata key marking an instance as TLS-terminating.
pub const META_SSL: &str = "ssl";
/// Metadata key marking an instance as a developer's local debug copy,
/// which must never receive production traffic.
pub const META_DEBUG: &str = "debug";

/// One live endpoint of a logical service, as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Logical service name the instance belongs to.
    #[serde(default)]
    pub service_name: String,
    /// IP address or hostname.
    pub ip: String,
    /// Listening port.
    pub port: u16,
    /// Free-form metadata flags (`ssl`, `debug`, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    /// A plain-HTTP instance with no metadata.
    #[must_use]
    pub fn new(service_name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            ip: ip.into(),
            port,
            metadata: HashMap::new(),
        }
    }

    /// Adds one metadata flag, builder style.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn flag(&self, key: &str) -> bool {
        self.metadata.get(key).is_some_and(|v| v == "true")
    }

    /// Whether the instance expects `https`.
    #[must_use]
    pub fn ssl(&self) -> bool {
        self.flag(META_SSL)
    }

    /// Whether the instance is a debug copy to be filtered from routing.
    #[must_use]
    pub fn debug(&self) -> bool {
        self.flag(META_DEBUG)
    }

    /// The base URL callers dial: scheme, host, and port.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl() { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.ip, self.port)
    }
}

/// Application-level status value meaning success.
pub const STATUS_SUCCESS: i64 = 1;

/// The response envelope the upstream services wrap every payload in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResult<T> {
    /// Application status code; [`STATUS_SUCCESS`] means the call worked.
    #[serde(default)]
    pub status: i64,
    /// Human-readable outcome description.
    #[serde(default)]
    pub msg: String,
    /// The payload; absent on failure and for void operations.
    pub data: Option<T>,
    /// Pagination info for list endpoints.
    pub page: Option<Page>,
}

impl<T> ApiResult<T> {
    /// Whether the application-level status signals success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Pagination block accompanying list responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page index.
    #[serde(default)]
    pub page: u64,
    /// Entries per page.
    #[serde(default)]
    pub size: u64,
    /// Total entries across all pages.
    #[serde(default)]
    pub total: u64,
}
