use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::error::{KeelError, Result};

/// Sentinel byte opening every frame. A mismatch means the stream is
/// desynchronized and the connection must be dropped.
pub const MAGIC: u8 = 0x1d;

/// Current protocol version.
pub const VERSION: u8 = 1;

/// Fixed header size in bytes. `body_len` is the only variable quantity.
pub const HEADER_LEN: usize = 17;

/// Maximum body size (100 MB) accepted on the wire, guarding against
/// memory exhaustion from a corrupt or hostile length field.
pub const MAX_BODY_LEN: usize = 100 * 1024 * 1024;

/// Message kind carried in the header.
///
/// `Heartbeat` and `Other` are reserved: they are accepted at the header
/// level but rejected as unsupported when their body would be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Heartbeat = 2,
    Other = 3,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::Heartbeat),
            3 => Ok(MessageType::Other),
            other => Err(KeelError::Protocol(format!(
                "unknown message type id: {}",
                other
            ))),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Status byte carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageStatus {
    Ok = 20,
    BadRequest = 40,
    BadResponse = 50,
}

impl MessageStatus {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            20 => Ok(MessageStatus::Ok),
            40 => Ok(MessageStatus::BadRequest),
            50 => Ok(MessageStatus::BadResponse),
            other => Err(KeelError::Protocol(format!(
                "unknown message status: {}",
                other
            ))),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == MessageStatus::Ok
    }
}

/// Fixed-size record preceding every frame body.
///
/// `request_id` correlates a response with its request on a connection.
/// `body_len` always equals the serialized byte length of the body using the
/// serializer named by `serializer_id`; it is computed during encoding and is
/// authoritative on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u8,
    pub version: u8,
    pub serializer_id: u8,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub request_id: u64,
    pub body_len: u32,
}

/// A remote method invocation.
///
/// A request is addressed to `service_key() = service_name:service_version`.
/// `return_type` declares the caller's expected result type; the payload
/// codec may not preserve runtime types on its own, and degraded (fail-back)
/// responses synthesize their default from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRequest {
    pub service_name: String,
    pub service_version: String,
    pub method_name: String,
    pub arg_types: Vec<String>,
    pub args: Vec<Value>,
    pub return_type: String,
}

impl CallRequest {
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        method_name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        let arg_types = args.iter().map(|v| json_type_name(v).to_string()).collect();
        CallRequest {
            service_name: service_name.into(),
            service_version: service_version.into(),
            method_name: method_name.into(),
            arg_types,
            args,
            return_type: "object".to_string(),
        }
    }

    pub fn with_return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    /// Key grouping all endpoints of one logical service.
    pub fn service_key(&self) -> String {
        format!("{}:{}", self.service_name, self.service_version)
    }
}

/// The outcome of a remote method invocation.
///
/// Exactly one of `data` / `error` is meaningful per response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallResponse {
    pub data: Option<Value>,
    pub data_type: String,
    pub message: String,
    pub error: Option<String>,
}

impl CallResponse {
    /// Creates a successful response, deriving `data_type` from the value.
    pub fn success(data: Value) -> Self {
        let data_type = json_type_name(&data).to_string();
        CallResponse {
            data: Some(data),
            data_type,
            message: "ok".to_string(),
            error: None,
        }
    }

    /// Creates a response carrying an error and a descriptive message.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        CallResponse {
            data: None,
            data_type: "null".to_string(),
            message: error.clone(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Names the JSON shape of a value for `data_type` / `arg_types` fields.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Typed body of a protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Request(CallRequest),
    Response(CallResponse),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Request(_) => MessageType::Request,
            MessageBody::Response(_) => MessageType::Response,
        }
    }
}

/// Header + typed body: the unit exchanged over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    pub header: MessageHeader,
    pub body: MessageBody,
}

impl ProtocolMessage {
    /// Builds a request message with a fresh globally unique request id.
    ///
    /// `body_len` is left at zero here; the codec computes the real value
    /// while encoding.
    pub fn request(serializer_id: u8, request: CallRequest) -> Self {
        ProtocolMessage {
            header: MessageHeader {
                magic: MAGIC,
                version: VERSION,
                serializer_id,
                message_type: MessageType::Request,
                status: MessageStatus::Ok,
                request_id: next_request_id(),
                body_len: 0,
            },
            body: MessageBody::Request(request),
        }
    }

    /// Builds a response message echoing the request's id and serializer.
    pub fn response(
        request_id: u64,
        serializer_id: u8,
        status: MessageStatus,
        response: CallResponse,
    ) -> Self {
        ProtocolMessage {
            header: MessageHeader {
                magic: MAGIC,
                version: VERSION,
                serializer_id,
                message_type: MessageType::Response,
                status,
                request_id,
                body_len: 0,
            },
            body: MessageBody::Response(response),
        }
    }
}

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a request id unique per call.
///
/// Upper 32 bits come from the wall clock, lower 32 bits from a process-wide
/// counter, so ids stay unique under concurrent calls and across restarts.
pub fn next_request_id() -> u64 {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    (timestamp & 0xFFFF_FFFF_0000_0000) | (counter & 0xFFFF_FFFF)
}
