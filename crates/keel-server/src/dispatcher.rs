use std::sync::Arc;

use tracing::warn;

use keel_common::protocol::{CallRequest, CallResponse};

use crate::service::ServiceTable;

/// Server-side request dispatcher.
///
/// Resolves the target implementation from the process-local service table
/// and invokes it. Every failure mode - unregistered service, unknown
/// method, implementation error - is captured into the response's error
/// field and returned as a normal response; the connection keeps framing
/// the next message.
#[derive(Clone)]
pub struct Dispatcher {
    services: Arc<ServiceTable>,
}

impl Dispatcher {
    pub fn new(services: Arc<ServiceTable>) -> Self {
        Dispatcher { services }
    }

    pub fn dispatch(&self, request: &CallRequest) -> CallResponse {
        let Some(service) = self.services.lookup(&request.service_name) else {
            warn!(
                "dispatch failed: service not registered: {}",
                request.service_name
            );
            return CallResponse::failure(format!(
                "service not registered: {}",
                request.service_name
            ));
        };

        match service.invoke(&request.method_name, &request.arg_types, &request.args) {
            Ok(value) => CallResponse::success(value),
            Err(error) => {
                warn!(
                    "dispatch of {}::{} failed: {}",
                    request.service_name, request.method_name, error
                );
                CallResponse::failure(format!(
                    "invocation of {}::{} failed: {}",
                    request.service_name, request.method_name, error
                ))
            }
        }
    }
}
