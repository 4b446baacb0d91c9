//! Keel Server
//!
//! The provider side of the framework: a process-local table of named
//! service implementations, a dispatcher that resolves and invokes them,
//! and the TCP server tying both to the wire.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keel_common::config::RpcConfig;
//! use keel_server::{RpcServer, RpcService, ServiceTable};
//! use serde_json::{json, Value};
//!
//! struct Greeter;
//! impl RpcService for Greeter {
//!     fn invoke(
//!         &self,
//!         method: &str,
//!         _arg_types: &[String],
//!         args: &[Value],
//!     ) -> Result<Value, String> {
//!         match method {
//!             "hello" => Ok(json!(format!("hello, {}", args[0]))),
//!             other => Err(format!("unknown method: {}", other)),
//!         }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let services = Arc::new(ServiceTable::new());
//! services.register("greeter", Arc::new(Greeter));
//! RpcServer::new(RpcConfig::default(), services).serve().await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod server;
pub mod service;

pub use dispatcher::Dispatcher;
pub use server::RpcServer;
pub use service::{RpcService, ServiceTable};
