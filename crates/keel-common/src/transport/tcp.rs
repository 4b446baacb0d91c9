use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::error::{KeelError, Result};
use crate::protocol::message::{MessageBody, ProtocolMessage};
use crate::wire::{FrameAssembler, ProtocolCodec};

/// Default timeout for establishing a connection (5 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a full request/response exchange (10 seconds)
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP client transport for Keel.
///
/// Creates a fresh connection for each exchange to enable true parallelism:
/// concurrent invocations never share a stream, so one call can never
/// consume another call's response. The response's `request_id` is still
/// verified against the request as a protocol-level guard.
///
/// # Example
///
/// ```no_run
/// use keel_common::transport::TcpCaller;
/// use keel_common::{CallRequest, ProtocolMessage, Serializer};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let caller = TcpCaller::default();
/// let request = CallRequest::new("user_service", "1.0", "get_user", vec![]);
/// let message = ProtocolMessage::request(Serializer::Json.id(), request);
/// let reply = caller.call("127.0.0.1:8080", &message).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpCaller {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl TcpCaller {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// Sends one message and awaits the correlated response.
    ///
    /// # Arguments
    ///
    /// * `addr` - The endpoint address (e.g. "127.0.0.1:8080")
    /// * `message` - The encoded-to-be request message
    ///
    /// # Errors
    ///
    /// - [`KeelError::Timeout`] when the whole exchange exceeds
    ///   `request_timeout`
    /// - [`KeelError::Connection`] on connect/read/write failures or when
    ///   the peer closes before a full frame arrived
    /// - [`KeelError::Protocol`] when the response does not correlate with
    ///   the request or is not a response at all
    pub async fn call(&self, addr: &str, message: &ProtocolMessage) -> Result<ProtocolMessage> {
        let encoded = ProtocolCodec::encode(message)?;
        let exchange = self.exchange(addr, encoded, message.header.request_id);

        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| KeelError::Timeout(self.request_timeout.as_millis() as u64))?
    }

    async fn exchange(
        &self,
        addr: &str,
        encoded: Vec<u8>,
        request_id: u64,
    ) -> Result<ProtocolMessage> {
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| KeelError::Timeout(self.connect_timeout.as_millis() as u64))?
            .map_err(|e| KeelError::Connection(format!("failed to connect to {}: {}", addr, e)))?;

        stream
            .write_all(&encoded)
            .await
            .map_err(|e| KeelError::Connection(format!("failed to write request: {}", e)))?;
        stream
            .flush()
            .await
            .map_err(|e| KeelError::Connection(format!("failed to flush request: {}", e)))?;

        let mut assembler = FrameAssembler::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| KeelError::Connection(format!("failed to read response: {}", e)))?;
            if n == 0 {
                return Err(KeelError::Connection(
                    "connection closed before a full response arrived".to_string(),
                ));
            }

            if let Some(frame) = assembler.push(&chunk[..n])?.into_iter().next() {
                let reply = ProtocolCodec::decode(&frame)?;
                if reply.header.request_id != request_id {
                    return Err(KeelError::Protocol(format!(
                        "response correlation id {} does not match request id {}",
                        reply.header.request_id, request_id
                    )));
                }
                if !matches!(reply.body, MessageBody::Response(_)) {
                    return Err(KeelError::Protocol(
                        "peer sent a non-response message on a client connection".to_string(),
                    ));
                }
                return Ok(reply);
            }
        }
    }
}

impl Default for TcpCaller {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let caller = TcpCaller::default();
        assert_eq!(caller.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(caller.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_connect_failure_maps_to_connection_error() {
        let caller = TcpCaller::new(Duration::from_millis(500), Duration::from_millis(800));
        let request = crate::protocol::CallRequest::new("svc", "1.0", "ping", vec![]);
        let message = ProtocolMessage::request(0, request);

        // Port 1 on loopback is essentially never listening.
        let err = caller.call("127.0.0.1:1", &message).await.unwrap_err();
        assert!(matches!(
            err,
            KeelError::Connection(_) | KeelError::Timeout(_)
        ));
    }
}
