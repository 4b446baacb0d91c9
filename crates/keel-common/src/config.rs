//! Runtime configuration types.
//!
//! Loading these from a file or the environment is the embedding
//! application's job; the framework only consumes the resolved values.

use serde::Deserialize;

/// Top-level framework configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Application name, used in logs.
    pub name: String,
    /// Host this process serves (and reports as its caller address).
    pub server_host: String,
    /// Port this process serves on. Zero binds an ephemeral port.
    pub server_port: u16,
    /// Default version stamped on requests and registered endpoints.
    pub service_version: String,
    /// Payload serializer name.
    pub serializer: String,
    /// Load balancer strategy name.
    pub load_balancer: String,
    /// Retry strategy name.
    pub retry_strategy: String,
    /// Tolerant strategy name, applied once retries are exhausted.
    pub tolerant_strategy: String,
    pub retry: RetryConfig,
    pub registry: RegistryConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            name: "keel".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            service_version: "1.0".to_string(),
            serializer: "json".to_string(),
            load_balancer: "round_robin".to_string(),
            retry_strategy: "no".to_string(),
            tolerant_strategy: "fail_fast".to_string(),
            retry: RetryConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// Settings for the fixed-interval retry strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay between attempts in milliseconds.
    pub interval_ms: u64,
    /// Total attempt bound, including the initial call.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_attempts: 3,
        }
    }
}

/// Registry backing-store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backend kind: `etcd`, `redis` or `memory`.
    pub kind: String,
    /// Backing-store address, e.g. `http://127.0.0.1:2379`.
    pub address: String,
    /// Connection timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            address: String::new(),
            timeout_ms: 5000,
        }
    }
}
