use std::sync::Arc;

use keel_common::config::RpcConfig;
use keel_common::protocol::error::Result;
use keel_common::Serializer;
use keel_registry::RegistryClient;

use crate::load_balance::{load_balancer_by_name, LoadBalancer};
use crate::retry::RetryPolicy;
use crate::tolerant::TolerantPolicy;

/// Everything resolved once at process start.
///
/// The configured strategy names (serializer, load balancer, retry,
/// tolerant) are turned into instances here, exactly once, and the context
/// is passed to every component that needs them. There is no global mutable
/// state: two contexts in one process (say, in a test) are fully isolated.
#[derive(Debug)]
pub struct RuntimeContext {
    pub config: RpcConfig,
    pub registry: Arc<RegistryClient>,
    pub serializer: Serializer,
    pub load_balancer: Arc<dyn LoadBalancer>,
    pub retry: RetryPolicy,
    pub tolerant: TolerantPolicy,
}

impl RuntimeContext {
    /// Resolves every configured strategy by name.
    ///
    /// # Errors
    ///
    /// [`KeelError::UnknownStrategy`](keel_common::KeelError::UnknownStrategy)
    /// when a configured name has no registered implementation.
    pub fn build(config: RpcConfig, registry: Arc<RegistryClient>) -> Result<Arc<Self>> {
        let serializer = Serializer::by_name(&config.serializer)?;
        let load_balancer = load_balancer_by_name(&config.load_balancer)?;
        let retry = RetryPolicy::by_name(&config.retry_strategy, &config.retry)?;
        let tolerant = TolerantPolicy::by_name(&config.tolerant_strategy)?;

        Ok(Arc::new(RuntimeContext {
            config,
            registry,
            serializer,
            load_balancer,
            retry,
            tolerant,
        }))
    }

    /// This process's address, passed to load balancers as a routing hint.
    pub fn caller_address(&self) -> String {
        format!("{}:{}", self.config.server_host, self.config.server_port)
    }
}
