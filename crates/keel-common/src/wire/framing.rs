use bytes::{Bytes, BytesMut};

use crate::protocol::error::{KeelError, Result};
use crate::protocol::message::{HEADER_LEN, MAX_BODY_LEN};
use crate::wire::codec::ProtocolCodec;

/// Where the assembler is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// Waiting for the fixed-size header.
    AwaitHeader,
    /// Header seen; waiting for the rest of a frame of this total length.
    AwaitBody { frame_len: usize },
}

/// Per-connection frame reassembly state machine.
///
/// TCP does not preserve message boundaries: a single read may carry part of
/// a frame, several whole frames, or the tail of one frame plus the head of
/// the next. `FrameAssembler` buffers raw bytes and emits exactly one
/// complete frame per encoded message, in order, never merging two frames
/// and never emitting a frame before it is fully present.
///
/// # Example
///
/// ```
/// use keel_common::wire::FrameAssembler;
///
/// let mut assembler = FrameAssembler::new();
/// // Feeding half a header yields nothing yet.
/// assert!(assembler.push(&[0x1d, 1, 0]).unwrap().is_empty());
/// ```
#[derive(Debug)]
pub struct FrameAssembler {
    buf: BytesMut,
    state: FrameState,
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler {
            buf: BytesMut::new(),
            state: FrameState::AwaitHeader,
        }
    }

    /// Absorbs one chunk read from the stream and returns every frame that
    /// became complete, in arrival order. Partial remainder stays buffered
    /// for the next call.
    ///
    /// # Errors
    ///
    /// [`KeelError::Protocol`] when the header declares a body larger than
    /// [`MAX_BODY_LEN`]; the connection should be dropped since the stream
    /// can no longer be trusted.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            match self.state {
                FrameState::AwaitHeader => {
                    let Some(frame_len) = ProtocolCodec::peek_frame_len(&self.buf) else {
                        break;
                    };
                    if frame_len - HEADER_LEN > MAX_BODY_LEN {
                        return Err(KeelError::Protocol(format!(
                            "declared body too large: {} bytes (max {})",
                            frame_len - HEADER_LEN,
                            MAX_BODY_LEN
                        )));
                    }
                    self.state = FrameState::AwaitBody { frame_len };
                }
                FrameState::AwaitBody { frame_len } => {
                    if self.buf.len() < frame_len {
                        break;
                    }
                    frames.push(self.buf.split_to(frame_len).freeze());
                    self.state = FrameState::AwaitHeader;
                }
            }
        }
        Ok(frames)
    }

    /// Bytes buffered but not yet emitted as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{
        CallRequest, CallResponse, MessageStatus, ProtocolMessage,
    };
    use crate::serializer::Serializer;
    use serde_json::json;

    fn encoded_frames(n: usize) -> Vec<Vec<u8>> {
        (0..n)
            .map(|i| {
                let message = if i % 2 == 0 {
                    ProtocolMessage::request(
                        Serializer::Json.id(),
                        CallRequest::new("svc", "1.0", format!("method_{}", i), vec![json!(i)]),
                    )
                } else {
                    ProtocolMessage::response(
                        i as u64,
                        Serializer::Json.id(),
                        MessageStatus::Ok,
                        CallResponse::success(json!(i)),
                    )
                };
                ProtocolCodec::encode(&message).unwrap()
            })
            .collect()
    }

    fn assert_emits_in_order(frames: &[Vec<u8>], chunk_size: usize) {
        let stream: Vec<u8> = frames.concat();
        let mut assembler = FrameAssembler::new();
        let mut emitted = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            emitted.extend(assembler.push(chunk).unwrap());
        }
        assert_eq!(emitted.len(), frames.len(), "chunk size {}", chunk_size);
        for (frame, expected) in emitted.iter().zip(frames) {
            assert_eq!(&frame[..], &expected[..]);
        }
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_single_frame_in_one_read() {
        let frames = encoded_frames(1);
        assert_emits_in_order(&frames, frames[0].len());
    }

    #[test]
    fn test_frame_split_byte_by_byte() {
        assert_emits_in_order(&encoded_frames(3), 1);
    }

    #[test]
    fn test_split_mid_header_and_mid_body() {
        let frames = encoded_frames(4);
        // Chunk sizes chosen to land splits inside headers and bodies.
        for chunk_size in [3, 7, 11, HEADER_LEN, HEADER_LEN + 1] {
            assert_emits_in_order(&frames, chunk_size);
        }
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let frames = encoded_frames(5);
        let stream: Vec<u8> = frames.concat();
        let mut assembler = FrameAssembler::new();
        let emitted = assembler.push(&stream).unwrap();
        assert_eq!(emitted.len(), 5);
    }

    #[test]
    fn test_tail_plus_head_across_reads() {
        let frames = encoded_frames(2);
        let first = &frames[0];
        let second = &frames[1];

        // One read: all of frame one plus the first 5 bytes of frame two.
        let mut read_one = first.clone();
        read_one.extend_from_slice(&second[..5]);

        let mut assembler = FrameAssembler::new();
        let emitted = assembler.push(&read_one).unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(&emitted[0][..], &first[..]);
        assert_eq!(assembler.pending(), 5);

        let emitted = assembler.push(&second[5..]).unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(&emitted[0][..], &second[..]);
    }

    #[test]
    fn test_emitted_frames_decode() {
        let frames = encoded_frames(3);
        let stream: Vec<u8> = frames.concat();
        let mut assembler = FrameAssembler::new();
        for frame in assembler.push(&stream).unwrap() {
            ProtocolCodec::decode(&frame).unwrap();
        }
    }

    #[test]
    fn test_oversized_body_rejected() {
        let mut header = vec![0u8; HEADER_LEN];
        header[0] = crate::protocol::message::MAGIC;
        header[1] = 1;
        header[3] = 0;
        header[4] = 20;
        header[13..17].copy_from_slice(&(u32::MAX).to_be_bytes());

        let mut assembler = FrameAssembler::new();
        let err = assembler.push(&header).unwrap_err();
        assert!(matches!(err, KeelError::Protocol(_)));
    }
}
