//! Keel Protocol Layer
//!
//! Defines the unit exchanged over the wire: a [`ProtocolMessage`] made of a
//! fixed-size [`MessageHeader`] and a typed [`MessageBody`] (a call request
//! or a call response).

pub mod error;
pub mod message;

#[cfg(test)]
mod tests;

pub use error::{KeelError, Result};
pub use message::{
    json_type_name, next_request_id, CallRequest, CallResponse, MessageBody, MessageHeader,
    MessageStatus, MessageType, ProtocolMessage, HEADER_LEN, MAGIC, MAX_BODY_LEN, VERSION,
};
