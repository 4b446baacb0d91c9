//! Redis registry backend.
//!
//! Redis offers no leases and no key-level watch, so the contract is built
//! from `SET ... EX` (a manually renewed TTL standing in for a lease) plus a
//! pub/sub channel broadcasting membership changes. Subscribers cannot know
//! which keys changed without another round trip, so any event clears the
//! whole discovery cache. Lease renewals rewrite the entry without
//! publishing - membership did not change, so peers' caches stay warm.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use keel_common::config::RegistryConfig;
use keel_common::protocol::error::Result;
use keel_common::protocol::KeelError;

use crate::cache::DiscoveryCache;
use crate::endpoint::EndpointInfo;
use crate::{storage_key, storage_prefix, HEARTBEAT_INTERVAL, LEASE_TTL};

/// Channel carrying registration/unregistration events.
const EVENTS_CHANNEL: &str = "keel:registry:events";

/// Registry client over a Redis server.
#[derive(Debug)]
pub struct RedisRegistry {
    client: redis::Client,
    conn: MultiplexedConnection,
    cache: Arc<DiscoveryCache>,
    local_keys: Arc<Mutex<HashSet<String>>>,
    watched: Arc<Mutex<HashSet<String>>>,
    subscribed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisRegistry {
    /// Connects to Redis and starts the heartbeat loop.
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        let url = if config.address.starts_with("redis://") {
            config.address.clone()
        } else {
            format!("redis://{}", config.address)
        };
        let client = redis::Client::open(url.as_str()).map_err(|e| {
            KeelError::Registry(format!("invalid redis address {}: {}", config.address, e))
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                KeelError::Registry(format!(
                    "failed to connect to redis at {}: {}",
                    config.address, e
                ))
            })?;

        let registry = RedisRegistry {
            client,
            conn,
            cache: Arc::new(DiscoveryCache::new()),
            local_keys: Arc::new(Mutex::new(HashSet::new())),
            watched: Arc::new(Mutex::new(HashSet::new())),
            subscribed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        };
        registry.spawn_heartbeat();
        info!("redis registry initialized at {}", config.address);
        Ok(registry)
    }

    /// Registers an endpoint with a 30-second TTL and announces it.
    pub async fn register(&self, endpoint: &EndpointInfo) -> Result<()> {
        let key = write_entry(&self.conn, endpoint, true).await?;
        self.local_keys
            .lock()
            .expect("registration set lock poisoned")
            .insert(key.clone());
        info!("registered service node {}", key);
        Ok(())
    }

    /// Deletes an endpoint's entry and announces the change. Absence of the
    /// key is not an error.
    pub async fn unregister(&self, endpoint: &EndpointInfo) -> Result<()> {
        let key = storage_key(endpoint);
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| KeelError::Registry(format!("failed to delete {}: {}", key, e)))?;
        conn.publish::<_, _, ()>(EVENTS_CHANNEL, key.as_str())
            .await
            .map_err(|e| KeelError::Registry(format!("failed to publish registry event: {}", e)))?;
        self.local_keys
            .lock()
            .expect("registration set lock poisoned")
            .remove(&key);
        info!("unregistered service node {}", key);
        Ok(())
    }

    /// Cache-first discovery backed by `KEYS prefix*` + `GET`.
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
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(format!("{}*", prefix))
            .await
            .map_err(|e| KeelError::Registry(format!("key scan of {} failed: {}", prefix, e)))?;

        let mut endpoints = Vec::new();
        for key in &keys {
            let value: Option<String> = conn
                .get(key)
                .await
                .map_err(|e| KeelError::Registry(format!("read of {} failed: {}", key, e)))?;
            // A key can expire between the scan and the read; that is just
            // an endpoint going away.
            let Some(value) = value else { continue };
            let endpoint: EndpointInfo = serde_json::from_str(&value).map_err(|e| {
                KeelError::Registry(format!("corrupt endpoint entry {}: {}", key, e))
            })?;
            endpoints.push(endpoint);
        }
        endpoints.sort_by_key(|e| e.node_key());

        self.ensure_subscribed();
        {
            let mut watched = self.watched.lock().expect("watch set lock poisoned");
            for key in keys {
                watched.insert(key);
            }
        }

        debug!(
            "discovered {} endpoints for {} from redis",
            endpoints.len(),
            service_key
        );
        self.cache.put(service_key, endpoints.clone());
        Ok(endpoints)
    }

    /// Starts the single pub/sub subscriber. Idempotent: every watched key
    /// shares the one channel-wide subscription.
    fn ensure_subscribed(&self) {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return;
        }

        let client = self.client.clone();
        let cache = self.cache.clone();
        let handle = tokio::spawn(async move {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    warn!("redis subscriber connection failed: {}", e);
                    return;
                }
            };
            if let Err(e) = pubsub.subscribe(EVENTS_CHANNEL).await {
                warn!("failed to subscribe to {}: {}", EVENTS_CHANNEL, e);
                return;
            }
            info!("subscribed to registry events on {}", EVENTS_CHANNEL);

            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let key: String = message.get_payload().unwrap_or_default();
                info!("registry event for {}, clearing discovery cache", key);
                cache.clear();
            }
            warn!("registry event stream ended");
        });
        self.tasks
            .lock()
            .expect("task list lock poisoned")
            .push(handle);
    }

    fn spawn_heartbeat(&self) {
        let conn = self.conn.clone();
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
                    let mut reader = conn.clone();
                    let value: std::result::Result<Option<String>, _> =
                        reader.get(&key).await;
                    match value {
                        Ok(None) => {
                            local_keys
                                .lock()
                                .expect("registration set lock poisoned")
                                .remove(&key);
                            warn!("lease expired for {}; node must be registered afresh", key);
                        }
                        Ok(Some(value)) => match serde_json::from_str::<EndpointInfo>(&value) {
                            Ok(endpoint) => match write_entry(&conn, &endpoint, false).await {
                                Ok(_) => debug!("renewed lease for {}", key),
                                Err(e) => warn!("lease renewal failed for {}: {}", key, e),
                            },
                            Err(e) => {
                                warn!("corrupt stored endpoint at {}, skipping renewal: {}", key, e)
                            }
                        },
                        Err(e) => warn!("heartbeat read failed for {}: {}", key, e),
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
        let mut conn = self.conn.clone();
        for key in keys {
            if let Err(e) = conn.del::<_, ()>(&key).await {
                warn!("failed to delete {} during shutdown: {}", key, e);
            }
            if let Err(e) = conn.publish::<_, _, ()>(EVENTS_CHANNEL, key.as_str()).await {
                warn!("failed to publish shutdown event for {}: {}", key, e);
            }
        }
        info!("redis registry shut down");
        Ok(())
    }
}

/// Stamps timestamps (preserving `register_time`) and writes the entry with
/// a fresh TTL. `announce` publishes a membership event; renewals pass
/// `false` since membership did not change.
async fn write_entry(
    conn: &MultiplexedConnection,
    endpoint: &EndpointInfo,
    announce: bool,
) -> Result<String> {
    let mut conn = conn.clone();
    let mut endpoint = endpoint.clone();
    endpoint.touch();
    let key = storage_key(&endpoint);
    let value = serde_json::to_string(&endpoint)?;

    conn.set_ex::<_, _, ()>(&key, value, LEASE_TTL.as_secs())
        .await
        .map_err(|e| KeelError::Registry(format!("failed to write {}: {}", key, e)))?;
    if announce {
        conn.publish::<_, _, ()>(EVENTS_CHANNEL, key.as_str())
            .await
            .map_err(|e| KeelError::Registry(format!("failed to publish registry event: {}", e)))?;
    }
    Ok(key)
}
