//! Frame wire format: 4-byte big-endian length prefix + payload.
//!
//! ```text
//! ┌──────────┬─────────────────┐
//! │ Length   │ Payload         │
//! │ 4 bytes  │ length bytes    │
//! │ uint32 BE│ UTF-8 JSON text │
//! └──────────┴─────────────────┘
//! ```
//!
//! Chunk boundaries on the stream are not message boundaries; the length
//! prefix is what re-synchronizes the reader on the next complete frame.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Length prefix size in bytes (fixed, exactly 4).
pub const LEN_PREFIX_SIZE: usize = 4;

/// Outbound writes are split into chunks of this size (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Default maximum payload size accepted from a peer (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Build a complete frame as a single byte vector.
///
/// # Example
///
/// ```
/// use sockwire::protocol::{build_frame, LEN_PREFIX_SIZE};
///
/// let frame = build_frame(b"hello");
/// assert_eq!(frame.len(), LEN_PREFIX_SIZE + 5);
/// assert_eq!(&frame[..4], &[0, 0, 0, 5]);
/// ```
pub fn build_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Write one frame, splitting the payload into bounded chunks.
///
/// Each chunk write suspends while the transport's send buffer is full and
/// resumes once it drains, so a large payload never piles up in user space.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;

    for chunk in payload.chunks(CHUNK_SIZE) {
        writer.write_all(chunk).await?;
    }

    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_build_frame_prefix_is_big_endian() {
        let payload = vec![0xAB; 300];
        let frame = build_frame(&payload);
        // 300 = 0x012C
        assert_eq!(&frame[..4], &[0, 0, 0x01, 0x2C]);
        assert_eq!(&frame[4..], &payload[..]);
    }

    #[test]
    fn test_build_frame_empty_payload() {
        let frame = build_frame(b"");
        assert_eq!(frame, vec![0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_write_frame_matches_build_frame() {
        let payload = b"some payload bytes";

        let mut written = Cursor::new(Vec::new());
        write_frame(&mut written, payload).await.unwrap();

        assert_eq!(written.into_inner(), build_frame(payload));
    }

    #[tokio::test]
    async fn test_write_frame_large_payload_is_intact() {
        // Spans several outbound chunks.
        let payload: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();

        let mut written = Cursor::new(Vec::new());
        write_frame(&mut written, &payload).await.unwrap();

        let bytes = written.into_inner();
        assert_eq!(bytes.len(), LEN_PREFIX_SIZE + payload.len());
        assert_eq!(&bytes[..4], &(payload.len() as u32).to_be_bytes());
        assert_eq!(&bytes[4..], &payload[..]);
    }
}
