//! Keel Common Types and Transport
//!
//! This crate provides the core protocol definitions and TCP transport layer
//! for the Keel distributed RPC framework.
//!
//! # Overview
//!
//! Keel lets a caller invoke a method on a remote service as if it were
//! local. The implementation runs in a separate process, discovered through a
//! registry, with load balancing and fault tolerance layered on top. This
//! crate contains the shared infrastructure used by every other component:
//!
//! - **Protocol Layer**: message header, call request/response types, error
//!   handling and request id generation
//! - **Wire Layer**: the binary frame codec and the framing state machine
//!   that reassembles frames from a raw byte stream
//! - **Transport Layer**: TCP client and server built on the wire layer
//!
//! # Wire Format
//!
//! Every message is a fixed 17-byte header followed by a serialized body:
//!
//! ```text
//! [magic 1][version 1][serializer 1][type 1][status 1][request id 8][body len 4][body ...]
//! ```
//!
//! All multi-byte integers are big-endian. `body len` is the only variable
//! quantity and drives framing.
//!
//! # Components
//!
//! - [`protocol`] - Core protocol types (header, request, response, error)
//! - [`serializer`] - Pluggable payload serialization boundary
//! - [`wire`] - Frame codec and the [`wire::FrameAssembler`] state machine
//! - [`transport`] - TCP caller and server
//! - [`config`] - Runtime configuration types

pub mod config;
pub mod protocol;
pub mod serializer;
pub mod transport;
pub mod wire;

pub use protocol::*;
pub use serializer::Serializer;
