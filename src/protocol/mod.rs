//! Protocol module - wire format, framing, and envelope types.
//!
//! This module implements the frame layer and the message layer:
//! - 4-byte big-endian length prefix encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Request/response envelopes with structural validation

mod envelope;
mod frame;
mod frame_buffer;

pub use envelope::{recover_request_id, Request, Response, METHODS_METHOD, PING_METHOD};
pub use frame::{build_frame, write_frame, CHUNK_SIZE, DEFAULT_MAX_FRAME_SIZE, LEN_PREFIX_SIZE};
pub use frame_buffer::FrameBuffer;
