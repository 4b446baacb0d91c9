//! Keel Transport Layer
//!
//! TCP client and server built on the wire layer. Both sides run a
//! [`FrameAssembler`](crate::wire::FrameAssembler) per connection, so
//! partial, merged and split frames are all handled before the codec ever
//! sees a byte.
//!
//! # Components
//!
//! - [`TcpCaller`] - one request/response exchange per fresh connection,
//!   with correlation-id verification and timeouts
//! - [`TcpServer`] - async accept loop spawning one task per connection

pub mod tcp;
pub mod tcp_server;

pub use tcp::TcpCaller;
pub use tcp_server::TcpServer;
