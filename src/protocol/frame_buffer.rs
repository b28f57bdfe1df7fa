//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `AwaitingPrefix`: need at least 4 bytes
//! - `AwaitingPayload`: length parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use sockwire::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in arbitrary chunks from the socket
//! let payloads = buffer.push(&build_frame(b"{}")).unwrap();
//! assert_eq!(&payloads[0][..], b"{}");
//! ```

use bytes::{Bytes, BytesMut};

use super::frame::{DEFAULT_MAX_FRAME_SIZE, LEN_PREFIX_SIZE};
use crate::error::{Result, SockwireError};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete length prefix (need 4 bytes).
    AwaitingPrefix,
    /// Prefix parsed, waiting for payload bytes.
    AwaitingPayload { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete payloads.
///
/// One instance per connection. A payload is handed out only once the
/// buffered byte count covers the full declared length; partial frames
/// persist across pushes.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default payload limit (64 MiB).
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom payload limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::AwaitingPrefix,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete payloads.
    ///
    /// Returns zero, one, or many payloads per push; chunk boundaries are
    /// never message boundaries. Fragments are buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns a `Protocol` error if a declared length exceeds the payload
    /// limit. The connection should be closed at that point; there is no
    /// way to re-synchronize past a hostile prefix.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut payloads = Vec::new();

        while let Some(payload) = self.try_extract_one()? {
            payloads.push(payload);
        }

        Ok(payloads)
    }

    /// Try to extract a single payload from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            State::AwaitingPrefix => {
                if self.buffer.len() < LEN_PREFIX_SIZE {
                    return Ok(None);
                }

                let declared = u32::from_be_bytes(
                    self.buffer[..LEN_PREFIX_SIZE]
                        .try_into()
                        .expect("buffer has enough bytes"),
                ) as usize;

                if declared > self.max_frame_size {
                    return Err(SockwireError::Protocol(format!(
                        "frame length {} exceeds maximum {}",
                        declared, self.max_frame_size
                    )));
                }

                let _ = self.buffer.split_to(LEN_PREFIX_SIZE);

                if declared == 0 {
                    return Ok(Some(Bytes::new()));
                }

                self.state = State::AwaitingPayload { remaining: declared };

                // Payload may already be buffered.
                self.try_extract_one()
            }

            State::AwaitingPayload { remaining } => {
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                self.state = State::AwaitingPrefix;

                Ok(Some(payload))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::AwaitingPrefix;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::AwaitingPrefix => "AwaitingPrefix",
            State::AwaitingPayload { .. } => "AwaitingPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
