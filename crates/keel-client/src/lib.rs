//! Keel Client
//!
//! The consumer side of the framework: resolve a service's endpoints
//! through the registry, pick one with a pluggable load balancer, exchange
//! the call over TCP, and apply retry and tolerant policies on failure.
//!
//! # Components
//!
//! - [`RuntimeContext`] - strategies resolved by name once at startup
//! - [`ServiceCaller`] - per-invocation orchestration
//! - [`load_balance`] - round-robin, consistent-hash and least-active
//!   strategies
//! - [`RetryPolicy`] / [`TolerantPolicy`] - fault-tolerance policy chain
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keel_client::{RuntimeContext, ServiceCaller};
//! use keel_common::config::RpcConfig;
//! use keel_registry::RegistryClient;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RpcConfig::default();
//! let registry = Arc::new(RegistryClient::connect(&config.registry).await?);
//! let context = RuntimeContext::build(config, registry)?;
//!
//! let caller = ServiceCaller::new(context);
//! let user = caller.invoke("user_service", "get_user", vec![json!(7)]).await?;
//! # Ok(())
//! # }
//! ```

pub mod caller;
pub mod context;
pub mod load_balance;
pub mod retry;
pub mod tolerant;

pub use caller::ServiceCaller;
pub use context::RuntimeContext;
pub use load_balance::{
    ConsistentHashLoadBalancer, LeastActiveLoadBalancer, LoadBalancer, RequestHints,
    RoundRobinLoadBalancer,
};
pub use retry::RetryPolicy;
pub use tolerant::{FailureContext, FallbackHandler, TolerantPolicy};
