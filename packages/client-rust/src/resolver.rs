//! Logical-name to base-URL resolution with caching and push refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use microcall_core::cache::{CacheError, CacheRegistry, TtlCache};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_GROUP;
use crate::error::RegistryError;
use crate::models::ServiceInstance;
use crate::registry::{Registry, SubscribeCallback};

/// Cache table holding resolved addresses, keyed by service name.
pub const ADDRESS_TABLE: &str = "nacos";
/// Cache table marking services with a live registry subscription.
pub const SUBSCRIPTION_TABLE: &str = "nacos:subscribe";
/// How long a resolved address is trusted before the registry is asked
/// again.
pub const ADDRESS_TTL: Duration = Duration::from_secs(5 * 60);

/// One resolved service: every known base URL plus the group the answer
/// came from. Overwritten wholesale on each registry push; never stored
/// with an empty host list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAddress {
    pub hosts: Vec<String>,
    pub group: String,
}

/// Resolves service names to base URLs through a [`Registry`], caching
/// answers for [`ADDRESS_TTL`] and keeping them fresh via at most one push
/// subscription per service.
///
/// Concurrent misses for the same name may each query the registry and
/// overwrite the cache; last writer wins, which is harmless because every
/// writer stores a then-valid answer.
pub struct ServiceResolver {
    registry: Arc<dyn Registry>,
    addresses: Arc<TtlCache<String, CachedAddress>>,
    subscriptions: Arc<TtlCache<String, bool>>,
    default_group: String,
}

impl ServiceResolver {
    /// Creates a resolver over `registry`, with its tables in `caches`.
    ///
    /// # Errors
    ///
    /// [`CacheError::TypeMismatch`] if the resolver's table names are
    /// already taken at other types.
    pub fn new(
        registry: Arc<dyn Registry>,
        caches: &CacheRegistry,
        default_group: impl Into<String>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            registry,
            addresses: caches.memory(ADDRESS_TABLE)?,
            subscriptions: caches.memory(SUBSCRIPTION_TABLE)?,
            default_group: default_group.into(),
        })
    }

    /// Resolves `service` to one base URL, returning it with the group the
    /// address belongs to.
    ///
    /// A live cached answer short-circuits the registry entirely; the host
    /// is picked uniformly at random from the cached set. On a miss the
    /// registry is queried in `preferred_group` (or the default group when
    /// empty), falling back to [`DEFAULT_GROUP`] once, and the answer is
    /// cached and subscribed to.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NoInstance`] when neither group has a healthy
    /// instance; registry transport failures otherwise. Never retried
    /// internally. A failed subscription attempt is logged but does not
    /// fail a resolution that already found an address.
    pub async fn resolve(
        &self,
        service: &str,
        preferred_group: &str,
    ) -> Result<(String, String), RegistryError> {
        if let Some(cached) = self.addresses.get(&service.to_string()) {
            return Ok((pick_host(&cached.hosts), cached.group));
        }

        let group = if preferred_group.is_empty() {
            self.default_group.as_str()
        } else {
            preferred_group
        };
        let (instance, group) = match self.registry.select_healthy_instance(service, group).await
        {
            Ok(instance) => (instance, group.to_string()),
            Err(RegistryError::NoInstance { .. }) if group != DEFAULT_GROUP => {
                let instance = self
                    .registry
                    .select_healthy_instance(service, DEFAULT_GROUP)
                    .await?;
                (instance, DEFAULT_GROUP.to_string())
            }
            Err(e) => return Err(e),
        };

        let url = instance.base_url();
        debug!(service = %service, group = %group, url = %url, "resolved service");
        self.addresses.set(
            service.to_string(),
            CachedAddress {
                hosts: vec![url.clone()],
                group: group.clone(),
            },
            Some(ADDRESS_TTL),
        );
        self.ensure_subscribed(service, &group).await;
        Ok((url, group))
    }

    /// Drops the cached address of `service`, forcing the next
    /// [`resolve`](Self::resolve) to consult the registry.
    pub fn invalidate(&self, service: &str) {
        self.addresses.delete(&service.to_string());
    }

    /// Creates the push subscription for `service` unless a live one is
    /// already marked. The marker is written only after a successful
    /// `subscribe`, so a failed attempt is retried by the next cache miss;
    /// two concurrent first resolves can at worst double-subscribe, which
    /// the delete-then-set push handler tolerates.
    async fn ensure_subscribed(&self, service: &str, group: &str) {
        if self.subscriptions.get(&service.to_string()).is_some() {
            return;
        }
        let addresses = Arc::clone(&self.addresses);
        let cb_group = group.to_string();
        let subscribed = service.to_string();
        let callback: SubscribeCallback = Arc::new(move |instances| {
            apply_push(&addresses, &subscribed, &cb_group, instances);
        });
        match self.registry.subscribe(service, group, callback).await {
            Ok(()) => self.subscriptions.set(service.to_string(), true, None),
            Err(e) => {
                warn!(service = %service, error = %e, "subscription failed, will retry on a later miss");
            }
        }
    }
}

/// Applies one registry push: debug instances are dropped, survivors are
/// grouped by the service name they report (instances with no name count
/// toward the subscribed service), and each affected cache entry is
/// overwritten wholesale. A push that leaves the subscribed service with
/// no routable instance deletes its entry instead of caching emptiness.
fn apply_push(
    addresses: &TtlCache<String, CachedAddress>,
    subscribed_service: &str,
    group: &str,
    instances: &[ServiceInstance],
) {
    let mut by_service: HashMap<String, Vec<String>> = HashMap::new();
    for instance in instances.iter().filter(|i| !i.debug()) {
        let service = if instance.service_name.is_empty() {
            subscribed_service.to_string()
        } else {
            instance.service_name.clone()
        };
        by_service.entry(service).or_default().push(instance.base_url());
    }

    if !by_service.contains_key(subscribed_service) {
        info!(service = %subscribed_service, "push left no routable instance");
        addresses.delete(&subscribed_service.to_string());
    }
    for (service, hosts) in by_service {
        debug!(service = %service, hosts = hosts.len(), "push refreshed addresses");
        addresses.delete(&service);
        addresses.set(
            service,
            CachedAddress {
                hosts,
                group: group.to_string(),
            },
            Some(ADDRESS_TTL),
        );
    }
}

fn pick_host(hosts: &[String]) -> String {
    debug_assert!(!hosts.is_empty(), "cached address with no hosts");
    if hosts.len() == 1 {
        return hosts[0].clone();
    }
    let picked = rand::rng().random_range(0..hosts.len());
    hosts[picked].clone()
}
