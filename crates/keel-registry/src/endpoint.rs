use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use keel_common::config::RpcConfig;

/// Version assumed when a service does not declare one.
pub const DEFAULT_SERVICE_VERSION: &str = "1.0";

/// One network-reachable instance of a service.
///
/// Identity is layered: `service_key()` groups every endpoint of one logical
/// service, while `node_key()` uniquely identifies one physical endpoint.
/// Timestamps are epoch milliseconds; `register_time` is stamped once at
/// first registration and preserved across lease renewals, `update_time`
/// moves on every renewal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointInfo {
    pub service_name: String,
    pub service_version: String,
    pub host: String,
    pub port: u16,
    pub register_time: Option<u64>,
    pub update_time: Option<u64>,
}

impl EndpointInfo {
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::with_version(service_name, DEFAULT_SERVICE_VERSION, host, port)
    }

    pub fn with_version(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        EndpointInfo {
            service_name: service_name.into(),
            service_version: service_version.into(),
            host: host.into(),
            port,
            register_time: None,
            update_time: None,
        }
    }

    /// The endpoint one of this process's services is reachable at, per
    /// the process configuration.
    pub fn from_config(config: &RpcConfig, service_name: impl Into<String>) -> Self {
        Self::with_version(
            service_name,
            config.service_version.clone(),
            config.server_host.clone(),
            config.server_port,
        )
    }

    /// Groups all endpoints of one logical service: `name:version`.
    pub fn service_key(&self) -> String {
        format!("{}:{}", self.service_name, self.service_version)
    }

    /// Uniquely identifies this physical endpoint:
    /// `name:version/host:port`.
    pub fn node_key(&self) -> String {
        format!("{}/{}", self.service_key(), self.address())
    }

    /// The dialable `host:port` address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Stamps registration timestamps: `register_time` only if unset,
    /// `update_time` always.
    pub fn touch(&mut self) {
        let now = epoch_millis();
        if self.register_time.is_none() {
            self.register_time = Some(now);
        }
        self.update_time = Some(now);
    }
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
