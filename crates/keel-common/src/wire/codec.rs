use crate::protocol::error::{KeelError, Result};
use crate::protocol::message::{
    MessageBody, MessageHeader, MessageStatus, MessageType, ProtocolMessage, HEADER_LEN, MAGIC,
    MAX_BODY_LEN, VERSION,
};
use crate::serializer::Serializer;

/// Binary frame codec for protocol messages.
///
/// A frame is the 17-byte header followed by `body_len` bytes of payload
/// serialized with the codec named by the header's `serializer_id`. Decoding
/// validates the magic byte first and fails fast on a mismatch, since that
/// means the stream is desynchronized.
pub struct ProtocolCodec;

impl ProtocolCodec {
    /// Encodes a message into `header-bytes ‖ body-bytes`.
    ///
    /// The written `body_len` always equals the actual serialized body
    /// length, regardless of what the in-memory header carried.
    pub fn encode(message: &ProtocolMessage) -> Result<Vec<u8>> {
        let serializer = Serializer::from_id(message.header.serializer_id)?;
        let body = match &message.body {
            MessageBody::Request(request) => serializer.serialize(request)?,
            MessageBody::Response(response) => serializer.serialize(response)?,
        };
        if body.len() > MAX_BODY_LEN {
            return Err(KeelError::Protocol(format!(
                "body too large: {} bytes (max {})",
                body.len(),
                MAX_BODY_LEN
            )));
        }

        let header = &message.header;
        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.push(header.magic);
        buf.push(header.version);
        buf.push(header.serializer_id);
        buf.push(header.message_type.as_u8());
        buf.push(header.status.as_u8());
        buf.extend_from_slice(&header.request_id.to_be_bytes());
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decodes exactly one message from a buffer of exactly frame length.
    ///
    /// # Errors
    ///
    /// - [`KeelError::Incomplete`] when the buffer is shorter than the
    ///   declared total length ("not enough data yet" - a framing concern)
    /// - [`KeelError::Protocol`] on bad magic, unsupported version, unknown
    ///   type/status ids, or trailing bytes past the declared frame
    /// - [`KeelError::UnsupportedMessageType`] for heartbeat/other frames,
    ///   which are reserved and have no body-level decoding
    pub fn decode(buf: &[u8]) -> Result<ProtocolMessage> {
        let header = Self::decode_header(buf)?;
        let total = HEADER_LEN + header.body_len as usize;
        if buf.len() < total {
            return Err(KeelError::Incomplete {
                expected: total,
                actual: buf.len(),
            });
        }
        if buf.len() > total {
            return Err(KeelError::Protocol(format!(
                "trailing bytes after frame: declared {}, buffer {}",
                total,
                buf.len()
            )));
        }

        let serializer = Serializer::from_id(header.serializer_id)?;
        let body_bytes = &buf[HEADER_LEN..total];
        let body = match header.message_type {
            MessageType::Request => MessageBody::Request(serializer.deserialize(body_bytes)?),
            MessageType::Response => MessageBody::Response(serializer.deserialize(body_bytes)?),
            MessageType::Heartbeat | MessageType::Other => {
                return Err(KeelError::UnsupportedMessageType(
                    header.message_type.as_u8(),
                ));
            }
        };

        Ok(ProtocolMessage { header, body })
    }

    /// Reads only the header and returns the total frame length, or `None`
    /// when fewer than [`HEADER_LEN`] bytes are available yet.
    ///
    /// Used by the framing layer and for batched decoding of a buffer that
    /// may contain N back-to-back frames.
    pub fn peek_frame_len(buf: &[u8]) -> Option<usize> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&buf[13..17]);
        Some(HEADER_LEN + u32::from_be_bytes(len_bytes) as usize)
    }

    /// Decodes every frame in a buffer of back-to-back frames, in order.
    ///
    /// A truncated final frame is an [`KeelError::Incomplete`] error; this
    /// entry point is for complete captures (a file, a drained buffer), not
    /// for live streams - those go through [`FrameAssembler`](super::FrameAssembler).
    pub fn decode_all(buf: &[u8]) -> Result<Vec<ProtocolMessage>> {
        let mut messages = Vec::new();
        let mut rest = buf;
        while !rest.is_empty() {
            let total = Self::peek_frame_len(rest).ok_or(KeelError::Incomplete {
                expected: HEADER_LEN,
                actual: rest.len(),
            })?;
            if rest.len() < total {
                return Err(KeelError::Incomplete {
                    expected: total,
                    actual: rest.len(),
                });
            }
            messages.push(Self::decode(&rest[..total])?);
            rest = &rest[total..];
        }
        Ok(messages)
    }

    fn decode_header(buf: &[u8]) -> Result<MessageHeader> {
        if buf.len() < HEADER_LEN {
            return Err(KeelError::Incomplete {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }
        if buf[0] != MAGIC {
            return Err(KeelError::Protocol(format!(
                "bad magic byte 0x{:02x}: stream out of sync",
                buf[0]
            )));
        }
        if buf[1] > VERSION {
            return Err(KeelError::Protocol(format!(
                "unsupported protocol version: {}",
                buf[1]
            )));
        }

        let message_type = MessageType::from_u8(buf[3])?;
        let status = MessageStatus::from_u8(buf[4])?;

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&buf[5..13]);
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&buf[13..17]);

        let body_len = u32::from_be_bytes(len_bytes);
        if body_len as usize > MAX_BODY_LEN {
            return Err(KeelError::Protocol(format!(
                "declared body too large: {} bytes (max {})",
                body_len, MAX_BODY_LEN
            )));
        }

        Ok(MessageHeader {
            magic: buf[0],
            version: buf[1],
            serializer_id: buf[2],
            message_type,
            status,
            request_id: u64::from_be_bytes(id_bytes),
            body_len,
        })
    }
}
