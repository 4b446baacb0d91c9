//! Tolerant strategies: what response to manufacture once all retries are
//! exhausted.

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use keel_common::protocol::error::Result;
use keel_common::protocol::{CallRequest, CallResponse, KeelError};
use keel_registry::EndpointInfo;

/// Alternative implementation invoked by the fail-back strategy instead of
/// the network. Same method surface as the remote service, different
/// implementation (a mock, a local degraded mode, a cached answer).
pub trait FallbackHandler: Send + Sync {
    fn handle(&self, request: &CallRequest) -> Result<Value>;
}

/// Everything a tolerant strategy may need about the failed call.
pub struct FailureContext<'a> {
    pub request: &'a CallRequest,
    /// The endpoint whose attempts were exhausted.
    pub failed: &'a EndpointInfo,
    /// The full candidate list discovery produced.
    pub endpoints: &'a [EndpointInfo],
    pub fallback: Option<Arc<dyn FallbackHandler>>,
}

/// Policy deciding the final outcome after retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TolerantPolicy {
    /// Propagate the error. The implicit default.
    FailFast,
    /// Try the remaining endpoints in list order, excluding the failed one.
    FailOver,
    /// Never touch the network again: fallback handler result, or a
    /// synthesized neutral value of the declared return type.
    FailBack,
}

impl TolerantPolicy {
    /// Resolves a configured strategy name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "fail_fast" => Ok(TolerantPolicy::FailFast),
            "fail_over" => Ok(TolerantPolicy::FailOver),
            "fail_back" => Ok(TolerantPolicy::FailBack),
            other => Err(KeelError::UnknownStrategy(format!("tolerant: {}", other))),
        }
    }

    /// Produces the final response (or error) for an exhausted call.
    ///
    /// `attempt` performs one transport exchange against a given endpoint;
    /// only fail-over uses it.
    pub async fn resolve<F, Fut>(
        &self,
        ctx: FailureContext<'_>,
        error: KeelError,
        mut attempt: F,
    ) -> Result<CallResponse>
    where
        F: FnMut(EndpointInfo) -> Fut,
        Fut: Future<Output = Result<CallResponse>>,
    {
        match self {
            TolerantPolicy::FailFast => Err(error),
            TolerantPolicy::FailOver => {
                if ctx.endpoints.len() <= 1 {
                    return Err(KeelError::FailoverExhausted(format!(
                        "no alternate endpoint for {} beyond failed node {}: {}",
                        ctx.request.service_key(),
                        ctx.failed.address(),
                        error
                    )));
                }

                let failed_key = ctx.failed.node_key();
                let mut last_error = error;
                let mut alternates = 0;
                for endpoint in ctx.endpoints {
                    if endpoint.node_key() == failed_key {
                        continue;
                    }
                    alternates += 1;
                    info!(
                        "failing over {} to {}",
                        ctx.request.method_name,
                        endpoint.address()
                    );
                    match attempt(endpoint.clone()).await {
                        Ok(response) => return Ok(response),
                        Err(e) => {
                            warn!("failover attempt on {} failed: {}", endpoint.address(), e);
                            last_error = e;
                        }
                    }
                }

                Err(KeelError::FailoverExhausted(format!(
                    "all {} alternate endpoints for {} failed, last error: {}",
                    alternates,
                    ctx.request.service_key(),
                    last_error
                )))
            }
            TolerantPolicy::FailBack => {
                if let Some(handler) = &ctx.fallback {
                    info!(
                        "degrading {} to its fallback handler",
                        ctx.request.method_name
                    );
                    let value = handler.handle(ctx.request)?;
                    return Ok(CallResponse::success(value));
                }

                info!(
                    "degrading {} to a default {} value",
                    ctx.request.method_name, ctx.request.return_type
                );
                Ok(CallResponse {
                    data: Some(default_value_for(&ctx.request.return_type)),
                    data_type: ctx.request.return_type.clone(),
                    message: "degraded default response".to_string(),
                    error: None,
                })
            }
        }
    }
}

/// Neutral value of a declared return type: zero-equivalent for
/// numeric/boolean types, absent for reference types.
fn default_value_for(return_type: &str) -> Value {
    match return_type {
        "bool" | "boolean" => json!(false),
        "number" | "int" | "long" | "float" | "double" | "i8" | "i16" | "i32" | "i64" | "u8"
        | "u16" | "u32" | "u64" | "f32" | "f64" => json!(0),
        _ => Value::Null,
    }
}
