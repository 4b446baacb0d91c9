//! Load-balancer strategies.
//!
//! Given a candidate endpoint list and per-call routing hints, a strategy
//! picks exactly one endpoint. Every strategy handles the degenerate cases
//! the same way: an empty list selects nothing (the caller treats that as
//! "no endpoint available"), a singleton list is returned directly without
//! algorithm overhead.

use std::sync::Arc;

use keel_common::protocol::error::Result;
use keel_common::protocol::KeelError;
use keel_registry::EndpointInfo;

pub mod consistent_hash;
pub mod least_active;
pub mod round_robin;

pub use consistent_hash::ConsistentHashLoadBalancer;
pub use least_active::LeastActiveLoadBalancer;
pub use round_robin::RoundRobinLoadBalancer;

/// Routing hints passed with every selection.
#[derive(Debug, Clone)]
pub struct RequestHints {
    /// Invoked method name; the consistent-hash strategy keys on it.
    pub method_name: String,
    /// Address of the calling process.
    pub caller: String,
}

/// A load-balancing strategy over a dynamic endpoint set.
///
/// `call_started`/`call_finished` are optional capability hooks for
/// strategies that account in-flight calls (least-active). The orchestrator
/// invokes them unconditionally around every network call; the default
/// implementations are no-ops, so strategies without accounting pay
/// nothing.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn select(&self, hints: &RequestHints, endpoints: &[EndpointInfo]) -> Option<EndpointInfo>;

    /// A call to `addr` was admitted.
    fn call_started(&self, _addr: &str) {}

    /// A call to `addr` completed (successfully or not).
    fn call_finished(&self, _addr: &str) {}
}

/// Resolves a configured strategy name to an instance.
pub fn load_balancer_by_name(name: &str) -> Result<Arc<dyn LoadBalancer>> {
    match name {
        "round_robin" => Ok(Arc::new(RoundRobinLoadBalancer::new())),
        "consistent_hash" => Ok(Arc::new(ConsistentHashLoadBalancer::new())),
        "least_active" => Ok(Arc::new(LeastActiveLoadBalancer::new())),
        other => Err(KeelError::UnknownStrategy(format!(
            "load balancer: {}",
            other
        ))),
    }
}

#[cfg(test)]
pub(crate) fn test_endpoints(ports: &[u16]) -> Vec<EndpointInfo> {
    ports
        .iter()
        .map(|&port| EndpointInfo::new("svc", "127.0.0.1", port))
        .collect()
}

#[cfg(test)]
pub(crate) fn test_hints(method: &str) -> RequestHints {
    RequestHints {
        method_name: method.to_string(),
        caller: "127.0.0.1:0".to_string(),
    }
}
