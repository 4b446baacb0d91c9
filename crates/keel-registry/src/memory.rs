//! In-process registry backend.
//!
//! A [`MemoryStore`] stands in for the distributed backing store: entries
//! carry a TTL deadline (lazily enforced on read, the way a lease silently
//! disappears) and every put/delete is pushed to subscribers over a
//! broadcast channel, standing in for the store's watch mechanism. Sharing
//! one store between several [`MemoryRegistry`] clients gives a faithful
//! single-process rendition of the full registry contract, which is what the
//! test suites and local deployments run against.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use keel_common::protocol::error::Result;
use keel_common::protocol::KeelError;

use crate::cache::DiscoveryCache;
use crate::endpoint::EndpointInfo;
use crate::{service_key_of, storage_key, storage_prefix, HEARTBEAT_INTERVAL, LEASE_TTL};

/// What happened to a stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Put,
    Delete,
}

/// Change notification pushed to store subscribers.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub kind: StoreEventKind,
    pub key: String,
}

#[derive(Debug)]
struct StoredEntry {
    value: String,
    expires_at: Instant,
}

/// Shared in-process key/value store with TTL entries and change events.
///
/// Cloning shares the underlying store, so separate registry clients (for
/// instance a provider and a consumer in one test) observe each other.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    entries: Mutex<HashMap<String, StoredEntry>>,
    events: broadcast::Sender<StoreEvent>,
    reads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        MemoryStore {
            inner: Arc::new(StoreInner {
                entries: Mutex::new(HashMap::new()),
                events,
                reads: AtomicU64::new(0),
            }),
        }
    }

    pub fn put(&self, key: String, value: String, ttl: Duration) {
        let mut entries = self.inner.entries.lock().expect("store lock poisoned");
        entries.insert(
            key.clone(),
            StoredEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        drop(entries);
        let _ = self.inner.events.send(StoreEvent {
            kind: StoreEventKind::Put,
            key,
        });
    }

    /// Reads one key, lazily expiring it when its lease ran out.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.reads.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.inner.entries.lock().expect("store lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                drop(entries);
                let _ = self.inner.events.send(StoreEvent {
                    kind: StoreEventKind::Delete,
                    key: key.to_string(),
                });
                None
            }
            None => None,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.inner.entries.lock().expect("store lock poisoned");
        let removed = entries.remove(key).is_some();
        drop(entries);
        if removed {
            let _ = self.inner.events.send(StoreEvent {
                kind: StoreEventKind::Delete,
                key: key.to_string(),
            });
        }
        removed
    }

    /// Lists live entries under a key prefix, sorted by key for a stable
    /// discovery order. Expired entries encountered on the way are dropped
    /// and announced as deletions.
    pub fn list_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        self.inner.reads.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut live = Vec::new();
        {
            let mut entries = self.inner.entries.lock().expect("store lock poisoned");
            for (key, entry) in entries.iter() {
                if !key.starts_with(prefix) {
                    continue;
                }
                if entry.expires_at > now {
                    live.push((key.clone(), entry.value.clone()));
                } else {
                    expired.push(key.clone());
                }
            }
            for key in &expired {
                entries.remove(key);
            }
        }
        for key in expired {
            let _ = self.inner.events.send(StoreEvent {
                kind: StoreEventKind::Delete,
                key,
            });
        }
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// How many read operations (gets and prefix lists) the store served.
    /// Lets callers observe cache effectiveness.
    pub fn backing_reads(&self) -> u64 {
        self.inner.reads.load(Ordering::Relaxed)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry client over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryRegistry {
    store: MemoryStore,
    cache: Arc<DiscoveryCache>,
    local_keys: Arc<Mutex<HashSet<String>>>,
    watched: Arc<Mutex<HashSet<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    lease_ttl: Duration,
}

impl MemoryRegistry {
    /// Creates a client over a fresh, private store.
    pub fn connect() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Creates a client over a shared store with the standard lease timing.
    pub fn with_store(store: MemoryStore) -> Self {
        Self::with_timing(store, LEASE_TTL, HEARTBEAT_INTERVAL)
    }

    /// Creates a client with explicit lease TTL and heartbeat period.
    pub fn with_timing(store: MemoryStore, lease_ttl: Duration, heartbeat: Duration) -> Self {
        let cache = Arc::new(DiscoveryCache::new());
        let local_keys = Arc::new(Mutex::new(HashSet::new()));
        let watched = Arc::new(Mutex::new(HashSet::new()));

        let watch_task = spawn_watcher(store.subscribe(), cache.clone(), watched.clone());
        let heartbeat_task =
            spawn_heartbeat(store.clone(), local_keys.clone(), lease_ttl, heartbeat);

        MemoryRegistry {
            store,
            cache,
            local_keys,
            watched,
            tasks: Mutex::new(vec![watch_task, heartbeat_task]),
            lease_ttl,
        }
    }

    /// The shared store behind this client.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub async fn register(&self, endpoint: &EndpointInfo) -> Result<()> {
        let mut endpoint = endpoint.clone();
        endpoint.touch();
        let key = storage_key(&endpoint);
        let value = serde_json::to_string(&endpoint)?;
        self.store.put(key.clone(), value, self.lease_ttl);
        self.local_keys
            .lock()
            .expect("registration set lock poisoned")
            .insert(key.clone());
        info!("registered service node {}", key);
        Ok(())
    }

    pub async fn unregister(&self, endpoint: &EndpointInfo) -> Result<()> {
        let key = storage_key(endpoint);
        self.store.delete(&key);
        self.local_keys
            .lock()
            .expect("registration set lock poisoned")
            .remove(&key);
        info!("unregistered service node {}", key);
        Ok(())
    }

    pub async fn discover(&self, service_key: &str) -> Result<Vec<EndpointInfo>> {
        if let Some(cached) = self.cache.get(service_key) {
            debug!(
                "discovery for {} served from cache ({} endpoints)",
                service_key,
                cached.len()
            );
            return Ok(cached);
        }

        let pairs = self.store.list_prefix(&storage_prefix(service_key));
        let mut endpoints = Vec::with_capacity(pairs.len());
        {
            let mut watched = self.watched.lock().expect("watch set lock poisoned");
            for (key, value) in pairs {
                let endpoint: EndpointInfo = serde_json::from_str(&value).map_err(|e| {
                    KeelError::Registry(format!("corrupt endpoint entry {}: {}", key, e))
                })?;
                watched.insert(key);
                endpoints.push(endpoint);
            }
        }

        debug!(
            "discovered {} endpoints for {} from backing store",
            endpoints.len(),
            service_key
        );
        self.cache.put(service_key, endpoints.clone());
        Ok(endpoints)
    }

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
        for key in keys {
            self.store.delete(&key);
        }
        info!("memory registry shut down");
        Ok(())
    }
}

/// Consumes store events: a deletion of a watched node key drops the owning
/// service's cache entry; updates are logged only.
fn spawn_watcher(
    mut events: broadcast::Receiver<StoreEvent>,
    cache: Arc<DiscoveryCache>,
    watched: Arc<Mutex<HashSet<String>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event.kind {
                    StoreEventKind::Delete => {
                        let is_watched = watched
                            .lock()
                            .expect("watch set lock poisoned")
                            .contains(&event.key);
                        if !is_watched {
                            continue;
                        }
                        if let Some(service_key) = service_key_of(&event.key) {
                            info!(
                                "node {} deleted, invalidating cache entry for {}",
                                event.key, service_key
                            );
                            cache.invalidate(&service_key);
                        }
                    }
                    StoreEventKind::Put => {
                        debug!("registry key updated: {}", event.key);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Deletions may be among the missed events; dropping
                    // everything keeps the cache honest.
                    warn!("watch channel lagged by {} events, clearing cache", missed);
                    cache.clear();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Renews the lease of every locally registered key. A key that already
/// expired is dropped and must be registered afresh; renewal failures are
/// logged and left to expire.
fn spawn_heartbeat(
    store: MemoryStore,
    local_keys: Arc<Mutex<HashSet<String>>>,
    lease_ttl: Duration,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
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
                match store.get(&key) {
                    None => {
                        local_keys
                            .lock()
                            .expect("registration set lock poisoned")
                            .remove(&key);
                        warn!("lease expired for {}; node must be registered afresh", key);
                    }
                    Some(value) => match serde_json::from_str::<EndpointInfo>(&value) {
                        Ok(mut endpoint) => {
                            endpoint.touch();
                            match serde_json::to_string(&endpoint) {
                                Ok(renewed) => {
                                    store.put(key.clone(), renewed, lease_ttl);
                                    debug!("renewed lease for {}", key);
                                }
                                Err(e) => warn!("lease renewal failed for {}: {}", key, e),
                            }
                        }
                        Err(e) => warn!("corrupt stored endpoint at {}, skipping renewal: {}", key, e),
                    },
                }
            }
        }
    })
}
