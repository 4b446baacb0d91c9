use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use keel_common::config::RpcConfig;
use keel_common::protocol::error::Result;
use keel_common::transport::TcpServer;

use crate::dispatcher::Dispatcher;
use crate::service::ServiceTable;

/// The provider-side RPC server.
///
/// Binds the TCP transport on the configured address and runs the
/// [`Dispatcher`] as its request handler. Every inbound frame is decoded,
/// dispatched against the service table, and answered on the same
/// connection with the request's id echoed.
pub struct RpcServer {
    config: RpcConfig,
    services: Arc<ServiceTable>,
}

impl RpcServer {
    pub fn new(config: RpcConfig, services: Arc<ServiceTable>) -> Self {
        RpcServer { config, services }
    }

    /// Binds the listener and serves in the foreground until an accept
    /// error occurs.
    pub async fn serve(self) -> Result<()> {
        let (server, addr) = self.bind().await?;
        info!("rpc server listening on {}", addr);
        Self::run(server, self.services).await
    }

    /// Binds the listener and serves on a background task, returning the
    /// actual bound address (useful with an ephemeral port) and the task
    /// handle.
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let (server, addr) = self.bind().await?;
        info!("rpc server listening on {}", addr);
        let services = self.services;
        let handle = tokio::spawn(async move {
            if let Err(e) = Self::run(server, services).await {
                error!("rpc server terminated: {}", e);
            }
        });
        Ok((addr, handle))
    }

    async fn bind(&self) -> Result<(TcpServer, SocketAddr)> {
        let bind_addr = format!("{}:{}", self.config.server_host, self.config.server_port);
        let server = TcpServer::bind(&bind_addr).await?;
        let addr = server.local_addr()?;
        Ok((server, addr))
    }

    async fn run(server: TcpServer, services: Arc<ServiceTable>) -> Result<()> {
        let dispatcher = Dispatcher::new(services);
        server
            .run_with_handler(move |request| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.dispatch(&request) }
            })
            .await
    }
}
