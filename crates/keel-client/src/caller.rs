use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use keel_common::protocol::error::Result;
use keel_common::protocol::{CallRequest, CallResponse, KeelError, MessageBody, ProtocolMessage};
use keel_common::transport::TcpCaller;
use keel_registry::EndpointInfo;

use crate::context::RuntimeContext;
use crate::load_balance::{LoadBalancer, RequestHints};
use crate::tolerant::{FailureContext, FallbackHandler};

/// Client-side call orchestrator.
///
/// Chains the core mechanisms on every invocation: discover endpoints
/// through the registry, pick one through the load balancer, exchange the
/// request over the transport, and apply the retry and tolerant policies on
/// failure. A transport-level success whose response carries a remote error
/// is a *dispatch* failure, not a transport one - it is returned as-is and
/// never retried.
pub struct ServiceCaller {
    context: Arc<RuntimeContext>,
    transport: TcpCaller,
    fallback: Option<Arc<dyn FallbackHandler>>,
}

impl ServiceCaller {
    pub fn new(context: Arc<RuntimeContext>) -> Self {
        ServiceCaller {
            context,
            transport: TcpCaller::default(),
            fallback: None,
        }
    }

    /// Supplies the fallback handler the fail-back strategy degrades to.
    pub fn with_fallback(mut self, handler: Arc<dyn FallbackHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Builds a request for `service`/`method` with the configured default
    /// service version.
    pub fn request(&self, service: &str, method: &str, args: Vec<Value>) -> CallRequest {
        CallRequest::new(
            service,
            self.context.config.service_version.clone(),
            method,
            args,
        )
    }

    /// Invokes a remote method and returns its result value, raising the
    /// response's carried error if there is one.
    pub async fn invoke(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let request = self.request(service, method, args);
        self.finish(self.call(request).await?)
    }

    /// Like [`invoke`](Self::invoke), declaring the expected return type
    /// (used by fail-back to synthesize a typed default).
    pub async fn invoke_typed(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        return_type: &str,
    ) -> Result<Value> {
        let request = self
            .request(service, method, args)
            .with_return_type(return_type);
        self.finish(self.call(request).await?)
    }

    /// Full orchestration for one invocation.
    ///
    /// Discovery is cache-first in the registry; an empty endpoint list
    /// fails immediately with [`KeelError::NoEndpoint`] and is never
    /// retried. Selection hints carry the method name and this process's
    /// address. The retry policy wraps attempts against the selected
    /// endpoint; once exhausted, the tolerant policy produces the final
    /// outcome.
    pub async fn call(&self, request: CallRequest) -> Result<CallResponse> {
        let service_key = request.service_key();
        let endpoints = self.context.registry.discover(&service_key).await?;
        if endpoints.is_empty() {
            return Err(KeelError::NoEndpoint(service_key));
        }

        let hints = RequestHints {
            method_name: request.method_name.clone(),
            caller: self.context.caller_address(),
        };
        let selected = self
            .context
            .load_balancer
            .select(&hints, &endpoints)
            .ok_or_else(|| KeelError::NoEndpoint(service_key.clone()))?;
        debug!(
            "routing {}::{} to {}",
            service_key,
            request.method_name,
            selected.address()
        );

        // One request id per logical call; retries and failover reuse it.
        let message = ProtocolMessage::request(self.context.serializer.id(), request.clone());

        let attempted = self
            .context
            .retry
            .execute(|| self.call_endpoint(selected.clone(), &message))
            .await;

        match attempted {
            Ok(response) => Ok(response),
            Err(error) => {
                let ctx = FailureContext {
                    request: &request,
                    failed: &selected,
                    endpoints: &endpoints,
                    fallback: self.fallback.clone(),
                };
                self.context
                    .tolerant
                    .resolve(ctx, error, |endpoint| self.call_endpoint(endpoint, &message))
                    .await
            }
        }
    }

    /// One transport exchange against one endpoint, bracketed by the load
    /// balancer's active-accounting hooks. The guard releases on every exit
    /// path, including errors and cancellation.
    async fn call_endpoint(
        &self,
        endpoint: EndpointInfo,
        message: &ProtocolMessage,
    ) -> Result<CallResponse> {
        let addr = endpoint.address();
        let _guard = ActiveGuard::enter(self.context.load_balancer.as_ref(), &addr);

        let reply = self.transport.call(&addr, message).await?;
        match reply.body {
            MessageBody::Response(response) => Ok(response),
            MessageBody::Request(_) => Err(KeelError::Protocol(
                "peer answered with a request message".to_string(),
            )),
        }
    }

    fn finish(&self, response: CallResponse) -> Result<Value> {
        match response.error {
            Some(error) => Err(KeelError::Remote(error)),
            None => Ok(response.data.unwrap_or(Value::Null)),
        }
    }
}

/// Scoped acquire/release around a network call: `call_started` on entry,
/// `call_finished` on drop, so the release happens even when the call errors
/// or the future is dropped mid-flight.
struct ActiveGuard<'a> {
    load_balancer: &'a dyn LoadBalancer,
    addr: &'a str,
}

impl<'a> ActiveGuard<'a> {
    fn enter(load_balancer: &'a dyn LoadBalancer, addr: &'a str) -> Self {
        load_balancer.call_started(addr);
        ActiveGuard {
            load_balancer,
            addr,
        }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.load_balancer.call_finished(self.addr);
    }
}
