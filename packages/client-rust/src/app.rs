//! [`AppContext`]: one object wiring caches, context, resolver, and
//! client together.
//!
//! Constructed once at startup and handed to whatever needs it; there is
//! no ambient global to reach for. Dropping it without calling
//! [`shutdown`](AppContext::shutdown) leaks the sweeper tasks until the
//! runtime stops.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use microcall_core::cache::CacheRegistry;
use microcall_core::context::ContextStore;
use tracing::info;

use crate::client::RpcClient;
use crate::config::ClientConfig;
use crate::registry::Registry;
use crate::resolver::ServiceResolver;

/// The assembled support library: shared cache tables, per-unit request
/// context, and the discovery-backed RPC client.
pub struct AppContext {
    caches: Arc<CacheRegistry>,
    context: ContextStore,
    resolver: Arc<ServiceResolver>,
    client: RpcClient,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("tables", &self.caches.len())
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Starts building an application context.
    #[must_use]
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::default()
    }

    /// The shared cache tables.
    #[must_use]
    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    /// The per-unit request context store.
    #[must_use]
    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    /// The service-name resolver.
    #[must_use]
    pub fn resolver(&self) -> &Arc<ServiceResolver> {
        &self.resolver
    }

    /// The outbound RPC client.
    #[must_use]
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Graceful shutdown: stops every cache sweeper and clears all tables.
    pub fn shutdown(&self) {
        info!("shutting down application context");
        self.caches.close_all();
    }
}

/// Builder for [`AppContext`]. A [`Registry`] is the only required piece.
#[derive(Default)]
pub struct AppContextBuilder {
    registry: Option<Arc<dyn Registry>>,
    config: Option<ClientConfig>,
    sweep_interval: Option<Duration>,
}

impl AppContextBuilder {
    /// Naming service the resolver queries. Required.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Client tunables; defaults apply when unset.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sweep interval for all cache tables; one minute when unset.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Wires everything together. Must run inside a tokio runtime (cache
    /// sweepers are spawned here).
    ///
    /// # Errors
    ///
    /// Fails when no registry was supplied, when the cache table names
    /// collide with differently-typed existing tables, or when the HTTP
    /// client cannot be built.
    pub fn build(self) -> anyhow::Result<AppContext> {
        let registry = self
            .registry
            .context("an AppContext needs a registry; call .registry(...)")?;
        let config = self.config.unwrap_or_default();
        let caches = Arc::new(match self.sweep_interval {
            Some(interval) => CacheRegistry::with_sweep_interval(interval),
            None => CacheRegistry::new(),
        });

        let context = ContextStore::new(&caches).context("creating context tables")?;
        let resolver = Arc::new(
            ServiceResolver::new(registry, &caches, config.default_group.clone())
                .context("creating resolver tables")?,
        );
        let client = RpcClient::new(Arc::clone(&resolver), context.clone(), config)
            .context("creating rpc client")?;

        Ok(AppContext {
            caches,
            context,
            resolver,
            client,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::registry::MemoryRegistry;

    use super::*;

    #[tokio::test]
    async fn build_wires_all_components() {
        let app = AppContext::builder()
            .registry(Arc::new(MemoryRegistry::new()))
            .build()
            .unwrap();

        // Context and resolver tables exist up front.
        assert!(app.caches().len() >= 3);
        assert_eq!(app.context().current_language(), "zh-cn");
    }

    #[tokio::test]
    async fn build_without_registry_fails() {
        let err = AppContext::builder().build().unwrap_err();
        assert!(err.to_string().contains("registry"));
    }

    #[tokio::test]
    async fn shutdown_clears_every_table() {
        let app = AppContext::builder()
            .registry(Arc::new(MemoryRegistry::new()))
            .build()
            .unwrap();

        app.context().put_context(std::collections::HashMap::new());
        app.shutdown();
        assert!(app.caches().is_empty());
        assert_eq!(app.context().request_id(), "");
    }
}
