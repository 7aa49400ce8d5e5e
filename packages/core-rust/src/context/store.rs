//! Per-unit request context over the shared cache tables.
//!
//! Inbound middleware calls [`ContextStore::put_context`] once per request;
//! everything downstream in the same concurrent unit reads attributes back
//! without parameter threading. Entries live in the `"Header"` and `"Lang"`
//! tables under the caller's [`UnitId`] with a 5-minute TTL that refreshes
//! on every write (never on read), so an abandoned unit's context expires
//! silently.
//!
//! Context never crosses unit boundaries implicitly. A spawned task that
//! wants the parent's attributes must capture the parent's id *before*
//! spawning and call [`ContextStore::copy_context`] from inside the child.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::cache::{CacheError, CacheRegistry, TtlCache};
use crate::context::header;
use crate::context::unit::UnitId;

/// Name of the table holding per-unit header maps.
pub const HEADER_TABLE: &str = "Header";
/// Name of the table holding per-unit language codes.
pub const LANG_TABLE: &str = "Lang";
/// Language returned when a unit never stored one.
pub const DEFAULT_LANGUAGE: &str = "zh-cn";

const CONTEXT_TTL: Duration = Duration::from_secs(5 * 60);

/// Pseudo-task-local storage for request attributes.
///
/// Cheap to clone; clones share the underlying tables.
#[derive(Clone)]
pub struct ContextStore {
    headers: Arc<TtlCache<UnitId, HashMap<String, String>>>,
    lang: Arc<TtlCache<UnitId, String>>,
}

impl ContextStore {
    /// Acquires the context tables from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::TypeMismatch`] if the table names are already
    /// taken at other types.
    pub fn new(caches: &CacheRegistry) -> Result<Self, CacheError> {
        Ok(Self {
            headers: caches.memory(HEADER_TABLE)?,
            lang: caches.memory(LANG_TABLE)?,
        })
    }

    /// The id of the calling unit. Capture this before spawning work that
    /// should inherit the context via [`copy_context`](Self::copy_context).
    #[must_use]
    pub fn current_id(&self) -> UnitId {
        UnitId::current()
    }

    /// Stores the request attributes for the calling unit, normalizing the
    /// tracing fields:
    ///
    /// - `X-Request-Id` is generated when absent or empty
    /// - `X-Real-IP` is set from `X-Forwarded-For` when present
    /// - `X-User-Agent` is backfilled from `User-Agent`
    /// - the language comes from `X-Lang`, defaulting to `"zh-cn"`
    pub fn put_context(&self, mut attrs: HashMap<String, String>) {
        if attrs
            .get(header::REQUEST_ID)
            .map_or(true, String::is_empty)
        {
            attrs.insert(header::REQUEST_ID.to_string(), generate_request_id());
        }
        let forwarded = attrs.get(header::FORWARDED_FOR).cloned();
        if let Some(ip) = forwarded.filter(|v| !v.is_empty()) {
            attrs.insert(header::REAL_IP.to_string(), ip);
        }
        if attrs
            .get(header::USER_AGENT)
            .map_or(true, String::is_empty)
        {
            if let Some(ua) = attrs.get(header::RAW_USER_AGENT).cloned() {
                attrs.insert(header::USER_AGENT.to_string(), ua);
            }
        }
        let lang = attrs
            .get(header::LANG)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let id = UnitId::current();
        self.headers.set(id.clone(), attrs, Some(CONTEXT_TTL));
        self.lang.set(id, lang, Some(CONTEXT_TTL));
    }

    /// Returns one attribute of the calling unit, or `""` when absent or
    /// expired. Never an error.
    #[must_use]
    pub fn get(&self, name: &str) -> String {
        self.headers
            .get(&UnitId::current())
            .and_then(|attrs| attrs.get(name).cloned())
            .unwrap_or_default()
    }

    /// Adds or replaces one attribute for the calling unit, refreshing the
    /// context TTL.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let id = UnitId::current();
        let mut attrs = self.headers.get(&id).unwrap_or_default();
        attrs.insert(name.into(), value.into());
        self.headers.set(id, attrs, Some(CONTEXT_TTL));
    }

    /// An owned copy of the calling unit's attributes; empty when absent.
    #[must_use]
    pub fn headers(&self) -> HashMap<String, String> {
        self.headers.get(&UnitId::current()).unwrap_or_default()
    }

    /// The trace id (`X-Request-Id`) of the calling unit, or `""`.
    #[must_use]
    pub fn request_id(&self) -> String {
        self.get(header::REQUEST_ID)
    }

    /// The client IP (`X-Real-IP`) of the calling unit, or `""`.
    #[must_use]
    pub fn client_ip(&self) -> String {
        self.get(header::REAL_IP)
    }

    /// The user agent (`X-User-Agent`) of the calling unit, or `""`.
    #[must_use]
    pub fn user_agent(&self) -> String {
        self.get(header::USER_AGENT)
    }

    /// The language of the calling unit, or [`DEFAULT_LANGUAGE`].
    #[must_use]
    pub fn current_language(&self) -> String {
        self.lang
            .get(&UnitId::current())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    }

    /// Explicit fork inheritance: copies `source`'s attributes to the
    /// calling unit. Call from inside a freshly spawned unit with the id
    /// the parent captured before spawning. A no-op when the source has no
    /// live context.
    pub fn copy_context(&self, source: &UnitId) {
        let id = UnitId::current();
        if let Some(attrs) = self.headers.get(source) {
            self.headers.set(id.clone(), attrs, Some(CONTEXT_TTL));
        }
        if let Some(lang) = self.lang.get(source) {
            self.lang.set(id, lang, Some(CONTEXT_TTL));
        }
    }
}

fn generate_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (CacheRegistry, ContextStore) {
        let registry = CacheRegistry::new();
        let store = ContextStore::new(&registry).unwrap();
        (registry, store)
    }

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn defaults_when_no_context_stored() {
        let (_registry, ctx) = store();
        assert_eq!(ctx.request_id(), "");
        assert_eq!(ctx.client_ip(), "");
        assert_eq!(ctx.current_language(), "zh-cn");
        assert!(ctx.headers().is_empty());
    }

    #[tokio::test]
    async fn put_context_round_trips_attributes() {
        let (_registry, ctx) = store();
        ctx.put_context(attrs(&[
            ("X-Request-Id", "req-123"),
            ("X-Real-IP", "10.1.2.3"),
            ("X-Lang", "en-us"),
        ]));

        assert_eq!(ctx.request_id(), "req-123");
        assert_eq!(ctx.client_ip(), "10.1.2.3");
        assert_eq!(ctx.current_language(), "en-us");
    }

    #[tokio::test]
    async fn request_id_generated_when_missing() {
        let (_registry, ctx) = store();
        ctx.put_context(HashMap::new());

        let id = ctx.request_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn forwarded_for_overrides_real_ip() {
        let (_registry, ctx) = store();
        ctx.put_context(attrs(&[
            ("X-Real-IP", "10.0.0.1"),
            ("X-Forwarded-For", "203.0.113.9"),
        ]));
        assert_eq!(ctx.client_ip(), "203.0.113.9");
    }

    #[tokio::test]
    async fn user_agent_backfilled_from_raw_header() {
        let (_registry, ctx) = store();
        ctx.put_context(attrs(&[("User-Agent", "curl/8.0")]));
        assert_eq!(ctx.user_agent(), "curl/8.0");
    }

    #[tokio::test]
    async fn context_is_invisible_to_other_units() {
        let (_registry, ctx) = store();
        ctx.put_context(attrs(&[("X-Request-Id", "parent-req")]));

        let child = ctx.clone();
        let observed = tokio::spawn(async move {
            (child.request_id(), child.current_language())
        })
        .await
        .unwrap();

        assert_eq!(observed, (String::new(), "zh-cn".to_string()));
    }

    #[tokio::test]
    async fn copy_context_inherits_parent_attributes() {
        let (_registry, ctx) = store();
        ctx.put_context(attrs(&[
            ("X-Request-Id", "parent-req"),
            ("X-Lang", "en-us"),
        ]));

        let parent_id = ctx.current_id();
        let child = ctx.clone();
        let observed = tokio::spawn(async move {
            child.copy_context(&parent_id);
            (child.request_id(), child.current_language())
        })
        .await
        .unwrap();

        assert_eq!(observed, ("parent-req".to_string(), "en-us".to_string()));
    }

    #[tokio::test]
    async fn set_header_updates_single_attribute() {
        let (_registry, ctx) = store();
        ctx.put_context(attrs(&[("X-Request-Id", "req-1")]));
        ctx.set_header("X-Custom", "value");

        assert_eq!(ctx.get("X-Custom"), "value");
        assert_eq!(ctx.request_id(), "req-1");
    }

    #[tokio::test(start_paused = true)]
    async fn context_expires_after_five_minutes_idle() {
        let (_registry, ctx) = store();
        ctx.put_context(attrs(&[("X-Request-Id", "req-1"), ("X-Lang", "en-us")]));

        tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;
        assert_eq!(ctx.request_id(), "");
        assert_eq!(ctx.current_language(), "zh-cn");
    }

    #[tokio::test(start_paused = true)]
    async fn write_refreshes_the_ttl() {
        let (_registry, ctx) = store();
        ctx.put_context(attrs(&[("X-Request-Id", "req-1")]));

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        ctx.set_header("X-Custom", "v");

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        // 6 minutes after put_context, but only 2 after the last write.
        assert_eq!(ctx.request_id(), "req-1");
    }
}
