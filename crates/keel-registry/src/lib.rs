//! Keel Service Registry
//!
//! Registers service endpoints in a distributed backing store under a
//! time-bounded lease, discovers endpoint lists by service key, and keeps a
//! local cache that self-invalidates when the store reports a change.
//!
//! # Key layout
//!
//! ```text
//! /rpc/{service_name}:{service_version}/{host}:{port}  ->  JSON EndpointInfo
//! ```
//!
//! # Consistency model
//!
//! There is no cross-process transaction: consistency with the backing
//! store is eventual, bounded by the 30-second lease TTL and the watch
//! delivery latency. Discovery is cache-first; a delete notification for
//! any watched node drops the owning service's whole cache entry, so the
//! next read is a forced miss.
//!
//! # Backends
//!
//! - [`EtcdRegistry`] - native leases and server-pushed watches
//! - [`RedisRegistry`] - manual TTL (`SET EX`) plus a pub/sub channel
//! - [`MemoryRegistry`] - in-process store for tests and single-process use
//!
//! All three satisfy the same externally observable contract and are chosen
//! by name through [`RegistryClient::connect`].

use std::time::Duration;

pub mod cache;
pub mod endpoint;
pub mod etcd;
pub mod memory;
pub mod redis;

pub use cache::DiscoveryCache;
pub use endpoint::{EndpointInfo, DEFAULT_SERVICE_VERSION};
pub use etcd::EtcdRegistry;
pub use memory::{MemoryRegistry, MemoryStore, StoreEvent, StoreEventKind};
pub use self::redis::RedisRegistry;

use keel_common::config::RegistryConfig;
use keel_common::protocol::error::Result;
use keel_common::protocol::KeelError;

/// Root path every registry key lives under.
pub const REGISTRY_ROOT: &str = "/rpc/";

/// Lease/TTL applied to every registration.
pub const LEASE_TTL: Duration = Duration::from_secs(30);

/// Period of the lease-renewal heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Storage key of one endpoint: `{root}{service_key}/{host}:{port}`.
pub(crate) fn storage_key(endpoint: &EndpointInfo) -> String {
    format!("{}{}", REGISTRY_ROOT, endpoint.node_key())
}

/// Prefix grouping every endpoint of one service. The trailing slash keeps
/// `svc:1.0` from matching `svc:1.0.1`.
pub(crate) fn storage_prefix(service_key: &str) -> String {
    format!("{}{}/", REGISTRY_ROOT, service_key)
}

/// Recovers the owning service key from a node's storage key.
pub(crate) fn service_key_of(storage_key: &str) -> Option<String> {
    let rest = storage_key.strip_prefix(REGISTRY_ROOT)?;
    let (service_key, _) = rest.rsplit_once('/')?;
    Some(service_key.to_string())
}

/// Registry client over one of the interchangeable backends.
///
/// Resolved by the configured backend name once at startup; every operation
/// dispatches to the selected backend.
#[derive(Debug)]
pub enum RegistryClient {
    Etcd(EtcdRegistry),
    Redis(RedisRegistry),
    Memory(MemoryRegistry),
}

impl RegistryClient {
    /// Connects the backend named by `config.kind` and starts its
    /// background heartbeat.
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        match config.kind.as_str() {
            "etcd" => Ok(RegistryClient::Etcd(EtcdRegistry::connect(config).await?)),
            "redis" => Ok(RegistryClient::Redis(RedisRegistry::connect(config).await?)),
            "memory" => Ok(RegistryClient::Memory(MemoryRegistry::connect())),
            other => Err(KeelError::UnknownStrategy(format!("registry: {}", other))),
        }
    }

    /// Registers (or renews) an endpoint under the lease TTL.
    pub async fn register(&self, endpoint: &EndpointInfo) -> Result<()> {
        match self {
            RegistryClient::Etcd(registry) => registry.register(endpoint).await,
            RegistryClient::Redis(registry) => registry.register(endpoint).await,
            RegistryClient::Memory(registry) => registry.register(endpoint).await,
        }
    }

    /// Best-effort removal of an endpoint's registration.
    pub async fn unregister(&self, endpoint: &EndpointInfo) -> Result<()> {
        match self {
            RegistryClient::Etcd(registry) => registry.unregister(endpoint).await,
            RegistryClient::Redis(registry) => registry.unregister(endpoint).await,
            RegistryClient::Memory(registry) => registry.unregister(endpoint).await,
        }
    }

    /// Cache-first endpoint discovery. Zero endpoints is a valid outcome,
    /// distinguished from a backing-store failure, which errors.
    pub async fn discover(&self, service_key: &str) -> Result<Vec<EndpointInfo>> {
        match self {
            RegistryClient::Etcd(registry) => registry.discover(service_key).await,
            RegistryClient::Redis(registry) => registry.discover(service_key).await,
            RegistryClient::Memory(registry) => registry.discover(service_key).await,
        }
    }

    /// Releases every locally registered endpoint and stops background
    /// work. Called once at process shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        match self {
            RegistryClient::Etcd(registry) => registry.shutdown().await,
            RegistryClient::Redis(registry) => registry.shutdown().await,
            RegistryClient::Memory(registry) => registry.shutdown().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_layout() {
        let endpoint = EndpointInfo::with_version("user_service", "2.0", "10.0.0.5", 9001);
        assert_eq!(
            storage_key(&endpoint),
            "/rpc/user_service:2.0/10.0.0.5:9001"
        );
        assert_eq!(storage_prefix("user_service:2.0"), "/rpc/user_service:2.0/");
    }

    #[test]
    fn test_service_key_recovered_from_storage_key() {
        assert_eq!(
            service_key_of("/rpc/user_service:2.0/10.0.0.5:9001").as_deref(),
            Some("user_service:2.0")
        );
        assert_eq!(service_key_of("/other/user_service:2.0/x"), None);
        assert_eq!(service_key_of("/rpc/no-slash"), None);
    }

    #[tokio::test]
    async fn test_connect_resolves_backend_by_name() {
        let config = RegistryConfig {
            kind: "memory".to_string(),
            ..RegistryConfig::default()
        };
        let registry = RegistryClient::connect(&config).await.unwrap();
        assert!(matches!(registry, RegistryClient::Memory(_)));

        let config = RegistryConfig {
            kind: "zookeeper".to_string(),
            ..RegistryConfig::default()
        };
        let err = RegistryClient::connect(&config).await.unwrap_err();
        assert!(matches!(err, KeelError::UnknownStrategy(_)));
    }

    #[tokio::test]
    async fn test_register_and_discover_through_facade() {
        let config = RegistryConfig::default();
        let registry = RegistryClient::connect(&config).await.unwrap();
        let endpoint = EndpointInfo::new("svc", "127.0.0.1", 9001);

        registry.register(&endpoint).await.unwrap();
        let found = registry.discover("svc:1.0").await.unwrap();
        assert_eq!(found.len(), 1);

        registry.unregister(&endpoint).await.unwrap();
        registry.shutdown().await.unwrap();
    }
}
