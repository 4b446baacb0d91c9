use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::protocol::error::{KeelError, Result};
use crate::protocol::message::{
    CallRequest, CallResponse, MessageBody, MessageStatus, ProtocolMessage,
};
use crate::wire::{FrameAssembler, ProtocolCodec};

/// Async TCP server for Keel.
///
/// Accepts connections in a loop and spawns an async task per connection.
/// Each connection owns its framing state, so partial and coalesced frames
/// on one socket never affect another. Connections are kept alive across
/// requests until the peer closes or a protocol error desynchronizes the
/// stream.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    /// Creates a new TCP server bound to the specified address.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g. "0.0.0.0:8080")
    pub async fn bind(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            KeelError::Connection(format!("failed to bind to {}: {}", bind_addr, e))
        })?;

        Ok(Self { listener })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| KeelError::Connection(format!("failed to get local addr: {}", e)))
    }

    /// Runs the server with the given request handler.
    ///
    /// The handler receives each decoded [`CallRequest`] and produces the
    /// [`CallResponse`] to send back; the response frame echoes the
    /// request's id and serializer id.
    ///
    /// # Arguments
    /// * `handler` - Function to handle each request
    pub async fn run_with_handler<F, Fut>(self, handler: F) -> Result<()>
    where
        F: Fn(CallRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CallResponse> + Send + 'static,
    {
        let handler = Arc::new(handler);

        loop {
            let (stream, peer_addr) = self.listener.accept().await.map_err(|e| {
                KeelError::Connection(format!("failed to accept connection: {}", e))
            })?;

            debug!("connection established from {}", peer_addr);

            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, handler).await {
                    warn!("connection from {} errored: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Handle a single connection: frame, decode, dispatch, respond.
///
/// Fatal protocol errors (bad magic, oversized frame) end the connection;
/// messages with reserved types are skipped, fatal to that message only.
async fn handle_connection<F, Fut>(mut stream: TcpStream, handler: Arc<F>) -> Result<()>
where
    F: Fn(CallRequest) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = CallResponse> + Send + 'static,
{
    let mut assembler = FrameAssembler::new();
    let mut chunk = vec![0u8; 8192];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => {
                debug!("connection closed by peer");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => {
                return Err(KeelError::Connection(format!(
                    "failed to read from connection: {}",
                    e
                )));
            }
        };

        for frame in assembler.push(&chunk[..n])? {
            let message = match ProtocolCodec::decode(&frame) {
                Ok(message) => message,
                Err(KeelError::UnsupportedMessageType(t)) => {
                    warn!("skipping message with unsupported type {}", t);
                    continue;
                }
                // Bad magic or a framing-level lie: the stream can no
                // longer be trusted.
                Err(e) => return Err(e),
            };

            let header = message.header;
            let request = match message.body {
                MessageBody::Request(request) => request,
                MessageBody::Response(_) => {
                    warn!("peer sent a response on a server connection, skipping");
                    continue;
                }
            };

            let response = handler(request).await;
            let status = if response.is_ok() {
                MessageStatus::Ok
            } else {
                MessageStatus::BadResponse
            };
            let reply = ProtocolMessage::response(
                header.request_id,
                header.serializer_id,
                status,
                response,
            );

            let encoded = ProtocolCodec::encode(&reply)?;
            stream
                .write_all(&encoded)
                .await
                .map_err(|e| KeelError::Connection(format!("failed to write response: {}", e)))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TcpCaller;
    use serde_json::json;

    #[tokio::test]
    async fn test_bind_and_local_addr() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_request_response_over_loopback() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = server
                .run_with_handler(|request| async move {
                    CallResponse::success(json!({
                        "echo": request.method_name,
                    }))
                })
                .await;
        });

        let caller = TcpCaller::default();
        let request = CallRequest::new("svc", "1.0", "ping", vec![]);
        let message = ProtocolMessage::request(0, request);
        let sent_id = message.header.request_id;

        let reply = caller.call(&addr.to_string(), &message).await.unwrap();
        assert_eq!(reply.header.request_id, sent_id);
        assert_eq!(reply.header.status, MessageStatus::Ok);
        match reply.body {
            MessageBody::Response(response) => {
                assert_eq!(response.data, Some(json!({"echo": "ping"})));
            }
            MessageBody::Request(_) => panic!("expected a response body"),
        }
    }

    #[tokio::test]
    async fn test_error_response_keeps_transport_alive() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = server
                .run_with_handler(|_| async move { CallResponse::failure("no such service") })
                .await;
        });

        let caller = TcpCaller::default();
        let message = ProtocolMessage::request(
            0,
            CallRequest::new("missing", "1.0", "m", vec![]),
        );

        // The dispatch error travels inside a well-formed response.
        let reply = caller.call(&addr.to_string(), &message).await.unwrap();
        assert_eq!(reply.header.status, MessageStatus::BadResponse);
        match reply.body {
            MessageBody::Response(response) => {
                assert_eq!(response.error.as_deref(), Some("no such service"));
            }
            MessageBody::Request(_) => panic!("expected a response body"),
        }
    }
}
