//! Keel Wire Layer
//!
//! Encodes/decodes a single [`ProtocolMessage`](crate::protocol::ProtocolMessage)
//! to and from its binary frame, and reassembles complete frames from a raw
//! byte stream that may deliver partial, merged or split frames.
//!
//! # Components
//!
//! - [`ProtocolCodec`] - frame encode/decode plus `peek_frame_len` for
//!   batched decoding of back-to-back frames
//! - [`FrameAssembler`] - per-connection state machine solving the
//!   sticky-packet problem: no frame reaches the codec until it is fully
//!   present, and no two frames are ever merged

pub mod codec;
pub mod framing;

pub use codec::ProtocolCodec;
pub use framing::FrameAssembler;
