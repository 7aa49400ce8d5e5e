//! [`Registry`] implementation over a naming server's HTTP API.
//!
//! The server is expected to speak the common open naming API:
//! `GET /v1/ns/instance/list` for queries, `POST`/`DELETE /v1/ns/instance`
//! for registration, and `PUT /v1/ns/instance/beat` for heartbeats. Push
//! subscriptions are emulated by polling the instance list and invoking
//! the callback whenever the snapshot changes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::models::ServiceInstance;
use crate::registry::{Registry, SubscribeCallback};

/// Connection settings for [`HttpRegistry`].
#[derive(Debug, Clone)]
pub struct HttpRegistryConfig {
    /// Base URL of the naming server, e.g. `http://127.0.0.1:8848/nacos`.
    pub server_addr: String,
    /// Namespace id sent with every request, when the server is
    /// multi-tenant.
    pub namespace: Option<String>,
    /// How often subscription polling re-fetches the instance list.
    pub poll_interval: Duration,
    /// How often a registered instance heartbeats.
    pub beat_interval: Duration,
}

impl Default for HttpRegistryConfig {
    fn default() -> Self {
        Self {
            server_addr: "http://127.0.0.1:8848/nacos".to_string(),
            namespace: None,
            poll_interval: Duration::from_secs(10),
            beat_interval: Duration::from_secs(5),
        }
    }
}

// Wire shape of the instance-list endpoint.
#[derive(Deserialize)]
struct InstanceList {
    #[serde(default)]
    hosts: Vec<HostRecord>,
}

#[derive(Deserialize)]
struct HostRecord {
    ip: String,
    port: u16,
    #[serde(default = "default_true")]
    healthy: bool,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

/// Naming-service client backed by the server's HTTP API.
///
/// [`close`](HttpRegistry::close) stops every polling and heartbeat task
/// this registry spawned; it is part of graceful shutdown.
pub struct HttpRegistry {
    config: HttpRegistryConfig,
    http: reqwest::Client,
    shutdown: watch::Sender<bool>,
}

impl HttpRegistry {
    /// Creates a registry client for the given server.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Http`] when the HTTP client cannot be built.
    pub fn new(config: HttpRegistryConfig) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            http,
            shutdown,
        })
    }

    /// Stops all background polling and heartbeat tasks.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    fn common_params(&self, service: &str, group: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("serviceName", service.to_string()),
            ("groupName", group.to_string()),
        ];
        if let Some(namespace) = &self.config.namespace {
            params.push(("namespaceId", namespace.clone()));
        }
        params
    }

    async fn fetch_instances(
        &self,
        service: &str,
        group: &str,
    ) -> Result<Vec<ServiceInstance>, RegistryError> {
        let url = format!("{}/v1/ns/instance/list", self.config.server_addr);
        let mut params = self.common_params(service, group);
        params.push(("healthyOnly", "true".to_string()));

        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        let list: InstanceList = serde_json::from_str(&body)
            .map_err(|e| RegistryError::Malformed(e.to_string()))?;

        Ok(list
            .hosts
            .into_iter()
            .filter(|h| h.healthy)
            .map(|h| ServiceInstance {
                service_name: service.to_string(),
                ip: h.ip,
                port: h.port,
                metadata: h.metadata,
            })
            .collect())
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn select_healthy_instance(
        &self,
        service: &str,
        group: &str,
    ) -> Result<ServiceInstance, RegistryError> {
        let instances = self.fetch_instances(service, group).await?;
        if instances.is_empty() {
            return Err(RegistryError::NoInstance {
                service: service.to_string(),
                group: group.to_string(),
            });
        }
        let picked = rand::rng().random_range(0..instances.len());
        Ok(instances[picked].clone())
    }

    async fn subscribe(
        &self,
        service: &str,
        group: &str,
        callback: SubscribeCallback,
    ) -> Result<(), RegistryError> {
        // Seed the snapshot so the first poll only fires on an actual
        // change relative to subscription time.
        let mut snapshot = self.fetch_instances(service, group).await.ok();

        let registry = self.clone_for_task();
        let service = service.to_string();
        let group = group.to_string();
        let mut stopped = self.shutdown.subscribe();
        let poll_interval = self.config.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match registry.fetch_instances(&service, &group).await {
                            Ok(current) => {
                                if snapshot.as_ref() != Some(&current) {
                                    debug!(service = %service, instances = current.len(),
                                        "instance list changed");
                                    callback(&current);
                                    snapshot = Some(current);
                                }
                            }
                            Err(e) => {
                                warn!(service = %service, error = %e,
                                    "instance list poll failed");
                            }
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            debug!(service = %service, "subscription poller stopped");
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn register_instance(
        &self,
        instance: ServiceInstance,
        group: &str,
    ) -> Result<(), RegistryError> {
        let url = format!("{}/v1/ns/instance", self.config.server_addr);
        let mut params = self.common_params(&instance.service_name, group);
        params.push(("ip", instance.ip.clone()));
        params.push(("port", instance.port.to_string()));
        params.push((
            "metadata",
            serde_json::to_string(&instance.metadata)
                .map_err(|e| RegistryError::Malformed(e.to_string()))?,
        ));
        self.http
            .post(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;

        // Keep the registration alive until shutdown.
        let registry = self.clone_for_task();
        let group = group.to_string();
        let mut stopped = self.shutdown.subscribe();
        let beat_interval = self.config.beat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(beat_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = registry.send_beat(&instance, &group).await {
                            warn!(service = %instance.service_name, error = %e,
                                "heartbeat failed");
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn deregister_instance(
        &self,
        instance: &ServiceInstance,
        group: &str,
    ) -> Result<(), RegistryError> {
        let url = format!("{}/v1/ns/instance", self.config.server_addr);
        let mut params = self.common_params(&instance.service_name, group);
        params.push(("ip", instance.ip.clone()));
        params.push(("port", instance.port.to_string()));
        self.http
            .delete(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl HttpRegistry {
    // Background tasks need an owned handle; the watch sender is shared so
    // close() reaches them all.
    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            http: self.http.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    async fn send_beat(
        &self,
        instance: &ServiceInstance,
        group: &str,
    ) -> Result<(), RegistryError> {
        let url = format!("{}/v1/ns/instance/beat", self.config.server_addr);
        let mut params = self.common_params(&instance.service_name, group);
        params.push(("ip", instance.ip.clone()));
        params.push(("port", instance.port.to_string()));
        self.http
            .put(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
