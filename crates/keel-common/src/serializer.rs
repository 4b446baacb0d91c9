//! Pluggable payload serialization boundary.
//!
//! The wire header names the payload codec by a one-byte id, so both sides
//! of a connection agree on how to read the body. Currently only JSON is
//! supported, but the enum allows for future extensibility (e.g.
//! MessagePack, CBOR, etc.) without touching the codec or the transports.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::{KeelError, Result};

/// Payload serializer selected by the header's `serializer_id`.
///
/// # Example
///
/// ```
/// use keel_common::Serializer;
///
/// let serializer = Serializer::by_name("json").unwrap();
/// let bytes = serializer.serialize(&vec![1, 2, 3]).unwrap();
/// let back: Vec<i32> = serializer.deserialize(&bytes).unwrap();
/// assert_eq!(back, vec![1, 2, 3]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serializer {
    /// JSON codec (currently the only supported format)
    Json,
}

impl Serializer {
    /// The one-byte id written into the message header.
    pub fn id(self) -> u8 {
        match self {
            Serializer::Json => 0,
        }
    }

    /// Resolves a header id back to a serializer.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Serializer::Json),
            other => Err(KeelError::UnknownSerializer(other)),
        }
    }

    /// Resolves a configured serializer name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "json" => Ok(Serializer::Json),
            other => Err(KeelError::UnknownStrategy(format!("serializer: {}", other))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Serializer::Json => "json",
        }
    }

    /// Serializes a value to bytes.
    pub fn serialize<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Serializer::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Deserializes a value from bytes.
    pub fn deserialize<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            Serializer::Json => Ok(serde_json::from_slice(data)?),
        }
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Serializer::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip() {
        let serializer = Serializer::Json;
        assert_eq!(Serializer::from_id(serializer.id()).unwrap(), serializer);
    }

    #[test]
    fn test_unknown_id_rejected() {
        let err = Serializer::from_id(0xff).unwrap_err();
        assert!(matches!(err, KeelError::UnknownSerializer(0xff)));
    }

    #[test]
    fn test_by_name() {
        assert_eq!(Serializer::by_name("json").unwrap(), Serializer::Json);
        assert!(Serializer::by_name("protobuf").is_err());
    }

    #[test]
    fn test_serialize_round_trip() {
        let serializer = Serializer::Json;
        let value = serde_json::json!({"x": 1, "y": [true, null]});
        let bytes = serializer.serialize(&value).unwrap();
        let back: serde_json::Value = serializer.deserialize(&bytes).unwrap();
        assert_eq!(back, value);
    }
}
