//! In-process [`Registry`] used by tests and single-binary deployments.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;

use crate::error::RegistryError;
use crate::models::ServiceInstance;
use crate::registry::{Registry, SubscribeCallback};

struct Subscription {
    service: String,
    callback: SubscribeCallback,
}

/// A registry whose instance tables live in this process.
///
/// `set_instances`/`push` mutate the tables directly; `push` additionally
/// fires the subscription callbacks the way a remote registry would. The
/// call counters exist so tests can assert how often the resolver actually
/// consulted the registry.
#[derive(Default)]
pub struct MemoryRegistry {
    // Keyed by (group, service).
    instances: DashMap<(String, String), Vec<ServiceInstance>>,
    subscriptions: Mutex<Vec<Subscription>>,
    select_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the instance list of `service` in `group` without notifying
    /// subscribers.
    pub fn set_instances(&self, service: &str, group: &str, instances: Vec<ServiceInstance>) {
        self.instances
            .insert((group.to_string(), service.to_string()), instances);
    }

    /// Replaces the instance list and notifies subscribers of `service`,
    /// mimicking a registry push.
    pub fn push(&self, service: &str, group: &str, instances: Vec<ServiceInstance>) {
        self.set_instances(service, group, instances.clone());
        let subscriptions = self.subscriptions.lock();
        for sub in subscriptions.iter().filter(|s| s.service == service) {
            (sub.callback)(&instances);
        }
    }

    /// How many times `select_healthy_instance` ran.
    #[must_use]
    pub fn select_count(&self) -> usize {
        self.select_calls.load(Ordering::Relaxed)
    }

    /// How many times `subscribe` ran.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn select_healthy_instance(
        &self,
        service: &str,
        group: &str,
    ) -> Result<ServiceInstance, RegistryError> {
        self.select_calls.fetch_add(1, Ordering::Relaxed);
        let key = (group.to_string(), service.to_string());
        let instances = self
            .instances
            .get(&key)
            .filter(|list| !list.is_empty())
            .ok_or_else(|| RegistryError::NoInstance {
                service: service.to_string(),
                group: group.to_string(),
            })?;
        let picked = rand::rng().random_range(0..instances.len());
        Ok(instances[picked].clone())
    }

    async fn subscribe(
        &self,
        service: &str,
        _group: &str,
        callback: SubscribeCallback,
    ) -> Result<(), RegistryError> {
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().push(Subscription {
            service: service.to_string(),
            callback,
        });
        Ok(())
    }

    async fn register_instance(
        &self,
        instance: ServiceInstance,
        group: &str,
    ) -> Result<(), RegistryError> {
        let service = instance.service_name.clone();
        let key = (group.to_string(), service.clone());
        let updated = {
            let mut entry = self.instances.entry(key).or_default();
            entry.retain(|i| !(i.ip == instance.ip && i.port == instance.port));
            entry.push(instance);
            entry.clone()
        };
        let subscriptions = self.subscriptions.lock();
        for sub in subscriptions.iter().filter(|s| s.service == service) {
            (sub.callback)(&updated);
        }
        Ok(())
    }

    async fn deregister_instance(
        &self,
        instance: &ServiceInstance,
        group: &str,
    ) -> Result<(), RegistryError> {
        let service = instance.service_name.clone();
        let key = (group.to_string(), service.clone());
        let updated = {
            let mut entry = self.instances.entry(key).or_default();
            entry.retain(|i| !(i.ip == instance.ip && i.port == instance.port));
            entry.clone()
        };
        let subscriptions = self.subscriptions.lock();
        for sub in subscriptions.iter().filter(|s| s.service == service) {
            (sub.callback)(&updated);
        }
        Ok(())
    }
}
