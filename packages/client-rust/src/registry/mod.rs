//! The naming-service boundary.
//!
//! The resolver depends only on the [`Registry`] trait; anything that can
//! answer "one healthy instance of X, please" and push instance-list
//! changes satisfies it. [`HttpRegistry`] talks to a real naming server,
//! [`MemoryRegistry`] backs tests and single-process deployments.

pub mod http;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::models::ServiceInstance;

pub use http::{HttpRegistry, HttpRegistryConfig};
pub use memory::MemoryRegistry;

/// Push-notification callback: receives the full current instance list of
/// the subscribed service whenever it changes.
pub type SubscribeCallback = Arc<dyn Fn(&[ServiceInstance]) + Send + Sync>;

/// A naming service mapping logical service names to live endpoints.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Picks one healthy instance of `service` in `group`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NoInstance`] when the group holds no healthy
    /// instance; transport and decode failures otherwise.
    async fn select_healthy_instance(
        &self,
        service: &str,
        group: &str,
    ) -> Result<ServiceInstance, RegistryError>;

    /// Registers interest in instance-list changes for `service`.
    ///
    /// The callback may fire from an arbitrary task. Callers are expected
    /// to subscribe at most once per service; the registry does not
    /// de-duplicate.
    ///
    /// # Errors
    ///
    /// Transport failures establishing the subscription.
    async fn subscribe(
        &self,
        service: &str,
        group: &str,
        callback: SubscribeCallback,
    ) -> Result<(), RegistryError>;

    /// Announces an instance of this process to the registry.
    ///
    /// # Errors
    ///
    /// Transport failures reaching the registry.
    async fn register_instance(
        &self,
        instance: ServiceInstance,
        group: &str,
    ) -> Result<(), RegistryError>;

    /// Withdraws a previously registered instance.
    ///
    /// # Errors
    ///
    /// Transport failures reaching the registry.
    async fn deregister_instance(
        &self,
        instance: &ServiceInstance,
        group: &str,
    ) -> Result<(), RegistryError>;
}
