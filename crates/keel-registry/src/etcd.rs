//! etcd registry backend.
//!
//! Uses etcd's native lease mechanism for time-bounded registrations and its
//! server-pushed watch for cache invalidation. Each registered key is put
//! under a fresh 30-second lease; the heartbeat loop re-registers (and so
//! re-leases) every locally owned key. A watch is opened per discovered node
//! key; a delete event drops the owning service's cache entry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use etcd_client::{Client, ConnectOptions, EventType, GetOptions, PutOptions};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use keel_common::config::RegistryConfig;
use keel_common::protocol::error::Result;
use keel_common::protocol::KeelError;

use crate::cache::DiscoveryCache;
use crate::endpoint::EndpointInfo;
use crate::{service_key_of, storage_key, storage_prefix, HEARTBEAT_INTERVAL, LEASE_TTL};

/// Registry client over an etcd cluster.
pub struct EtcdRegistry {
    client: Client,
    cache: Arc<DiscoveryCache>,
    local_keys: Arc<Mutex<HashSet<String>>>,
    watched: Arc<Mutex<HashSet<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for EtcdRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `etcd_client::Client` does not implement `Debug`, so it is omitted.
        f.debug_struct("EtcdRegistry")
            .field("cache", &self.cache)
            .field("local_keys", &self.local_keys)
            .field("watched", &self.watched)
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

impl EtcdRegistry {
    /// Connects to etcd and starts the heartbeat loop.
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        let options = ConnectOptions::new()
            .with_connect_timeout(Duration::from_millis(config.timeout_ms));
        let client = Client::connect([config.address.as_str()], Some(options))
            .await
            .map_err(|e| {
                KeelError::Registry(format!(
                    "failed to connect to etcd at {}: {}",
                    config.address, e
                ))
            })?;

        let registry = EtcdRegistry {
            client,
            cache: Arc::new(DiscoveryCache::new()),
            local_keys: Arc::new(Mutex::new(HashSet::new())),
            watched: Arc::new(Mutex::new(HashSet::new())),
            tasks: Mutex::new(Vec::new()),
        };
        registry.spawn_heartbeat();
        info!("etcd registry initialized at {}", config.address);
        Ok(registry)
    }

    /// Registers (or renews) an endpoint under a fresh lease.
    pub async fn register(&self, endpoint: &EndpointInfo) -> Result<()> {
        let key = put_with_lease(&self.client, endpoint).await?;
        self.local_keys
            .lock()
            .expect("registration set lock poisoned")
            .insert(key.clone());
        info!("registered service node {}", key);
        Ok(())
    }

    /// Deletes an endpoint's entry. Absence of the key is not an error.
    pub async fn unregister(&self, endpoint: &EndpointInfo) -> Result<()> {
        let key = storage_key(endpoint);
        let mut client = self.client.clone();
        client
            .delete(key.as_str(), None)
            .await
            .map_err(|e| KeelError::Registry(format!("failed to delete {}: {}", key, e)))?;
        self.local_keys
            .lock()
            .expect("registration set lock poisoned")
            .remove(&key);
        info!("unregistered service node {}", key);
        Ok(())
    }

    /// Cache-first discovery: a cached non-empty list short-circuits;
    /// otherwise a prefix read populates the cache and opens a watch on
    /// every returned node key.
    pub async fn discover(&self, service_key: &str) -> Result<Vec<EndpointInfo>> {
        if let Some(cached) = self.cache.get(service_key) {
            debug!(
                "discovery for {} served from cache ({} endpoints)",
                service_key,
                cached.len()
            );
            return Ok(cached);
        }

        let prefix = storage_prefix(service_key);
        let mut client = self.client.clone();
        let response = client
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| {
                KeelError::Registry(format!("prefix read of {} failed: {}", prefix, e))
            })?;

        let mut endpoints = Vec::new();
        let mut keys = Vec::new();
        for kv in response.kvs() {
            let key = kv
                .key_str()
                .map_err(|e| KeelError::Registry(format!("non-utf8 key: {}", e)))?
                .to_string();
            let value = kv
                .value_str()
                .map_err(|e| KeelError::Registry(format!("non-utf8 value at {}: {}", key, e)))?;
            let endpoint: EndpointInfo = serde_json::from_str(value).map_err(|e| {
                KeelError::Registry(format!("corrupt endpoint entry {}: {}", key, e))
            })?;
            endpoints.push(endpoint);
            keys.push(key);
        }
        endpoints.sort_by_key(|e| e.node_key());

        for key in keys {
            self.watch(key).await?;
        }

        debug!(
            "discovered {} endpoints for {} from etcd",
            endpoints.len(),
            service_key
        );
        self.cache.put(service_key, endpoints.clone());
        Ok(endpoints)
    }

    /// Opens a watch on one node key. Watching an already-watched key is a
    /// no-op.
    async fn watch(&self, node_key: String) -> Result<()> {
        {
            let mut watched = self.watched.lock().expect("watch set lock poisoned");
            if !watched.insert(node_key.clone()) {
                return Ok(());
            }
        }

        let mut client = self.client.clone();
        let (watcher, mut stream) = match client.watch(node_key.as_str(), None).await {
            Ok(pair) => pair,
            Err(e) => {
                self.watched
                    .lock()
                    .expect("watch set lock poisoned")
                    .remove(&node_key);
                return Err(KeelError::Registry(format!(
                    "failed to watch {}: {}",
                    node_key, e
                )));
            }
        };

        debug!("watching node {}", node_key);
        let cache = self.cache.clone();
        let handle = tokio::spawn(async move {
            // Dropping the watcher cancels the watch on the server.
            let _watcher = watcher;
            loop {
                match stream.message().await {
                    Ok(Some(response)) => {
                        for event in response.events() {
                            match event.event_type() {
                                EventType::Delete => {
                                    if let Some(service_key) = service_key_of(&node_key) {
                                        info!(
                                            "node {} deleted, invalidating cache entry for {}",
                                            node_key, service_key
                                        );
                                        cache.invalidate(&service_key);
                                    }
                                }
                                EventType::Put => {
                                    debug!("node {} updated", node_key);
                                }
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("watch stream for {} errored: {}", node_key, e);
                        break;
                    }
                }
            }
        });
        self.tasks
            .lock()
            .expect("task list lock poisoned")
            .push(handle);
        Ok(())
    }

    fn spawn_heartbeat(&self) {
        let client = self.client.clone();
        let local_keys = self.local_keys.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let keys: Vec<String> = local_keys
                    .lock()
                    .expect("registration set lock poisoned")
                    .iter()
                    .cloned()
                    .collect();
                for key in keys {
                    let mut kv = client.clone();
                    let response = match kv.get(key.as_str(), None).await {
                        Ok(response) => response,
                        Err(e) => {
                            warn!("heartbeat read failed for {}: {}", key, e);
                            continue;
                        }
                    };
                    let Some(entry) = response.kvs().first() else {
                        local_keys
                            .lock()
                            .expect("registration set lock poisoned")
                            .remove(&key);
                        warn!("lease expired for {}; node must be registered afresh", key);
                        continue;
                    };
                    let endpoint = entry
                        .value_str()
                        .ok()
                        .and_then(|v| serde_json::from_str::<EndpointInfo>(v).ok());
                    match endpoint {
                        Some(endpoint) => match put_with_lease(&client, &endpoint).await {
                            Ok(_) => debug!("renewed lease for {}", key),
                            Err(e) => warn!("lease renewal failed for {}: {}", key, e),
                        },
                        None => warn!("corrupt stored endpoint at {}, skipping renewal", key),
                    }
                }
            }
        });
        self.tasks
            .lock()
            .expect("task list lock poisoned")
            .push(handle);
    }

    /// Deletes every locally registered key and stops background work.
    pub async fn shutdown(&self) -> Result<()> {
        for task in self
            .tasks
            .lock()
            .expect("task list lock poisoned")
            .drain(..)
        {
            task.abort();
        }
        let keys: Vec<String> = self
            .local_keys
            .lock()
            .expect("registration set lock poisoned")
            .drain()
            .collect();
        let mut client = self.client.clone();
        for key in keys {
            if let Err(e) = client.delete(key.as_str(), None).await {
                warn!("failed to delete {} during shutdown: {}", key, e);
            }
        }
        info!("etcd registry shut down");
        Ok(())
    }
}

/// Stamps timestamps (preserving `register_time`), grants a fresh lease and
/// writes the endpoint under it. Returns the storage key.
async fn put_with_lease(client: &Client, endpoint: &EndpointInfo) -> Result<String> {
    let mut client = client.clone();
    let lease = client
        .lease_grant(LEASE_TTL.as_secs() as i64, None)
        .await
        .map_err(|e| KeelError::Registry(format!("lease grant failed: {}", e)))?;

    let mut endpoint = endpoint.clone();
    endpoint.touch();
    let key = storage_key(&endpoint);
    let value = serde_json::to_string(&endpoint)?;

    client
        .put(
            key.as_str(),
            value,
            Some(PutOptions::new().with_lease(lease.id())),
        )
        .await
        .map_err(|e| KeelError::Registry(format!("failed to write {}: {}", key, e)))?;
    Ok(key)
}
