//! Dedicated writer task for outbound frames.
//!
//! Each connection gets one writer task fed through an mpsc channel, so
//! concurrent callers never interleave partial frames on the wire and never
//! contend on a mutex around the socket.
//!
//! ```text
//! caller 1 ─┐
//! caller 2 ─┼─► mpsc::Sender<OutboundFrame> ─► writer task ─► socket
//! caller N ─┘
//! ```
//!
//! A shared pending counter bounds how many frames may sit in the queue;
//! senders wait (up to a timeout) when the limit is hit. On the socket side
//! each payload goes out in bounded chunks, suspending while the transport
//! applies backpressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, SockwireError};
use crate::protocol::{CHUNK_SIZE, LEN_PREFIX_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames drained per wakeup before flushing.
const MAX_BATCH_SIZE: usize = 64;

/// Interval between backpressure checks while waiting.
const CHECK_INTERVAL: Duration = Duration::from_micros(100);

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded length prefix (4 bytes, big endian).
    header: [u8; LEN_PREFIX_SIZE],
    /// Payload bytes.
    payload: Bytes,
}

impl OutboundFrame {
    /// Wrap a payload, computing its length prefix.
    #[inline]
    pub fn new(payload: Bytes) -> Self {
        Self {
            header: (payload.len() as u32).to_be_bytes(),
            payload,
        }
    }

    /// Total size of this frame (prefix + payload).
    #[inline]
    pub fn size(&self) -> usize {
        LEN_PREFIX_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// How long a sender waits for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; one per caller.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Send a frame to the writer task.
    ///
    /// Waits while backpressure is active, failing with
    /// `BackpressureTimeout` if it does not clear in time, and with
    /// `ConnectionClosed` once the writer task is gone.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            SockwireError::ConnectionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(SockwireError::BackpressureTimeout);
            }

            tokio::time::sleep(CHECK_INTERVAL).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        max_pending: config.max_pending_frames,
        timeout: config.backpressure_timeout,
    };

    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

/// Main writer loop: drain the queue in batches, one flush per batch.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            // Channel closed, clean shutdown.
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let result = write_batch(&mut writer, &batch).await;

        pending.fetch_sub(batch_size, Ordering::Release);

        result?;
    }
}

/// Write a batch of frames, each payload in bounded chunks.
///
/// `write_all` suspends whenever the transport's send buffer is full and
/// resumes after it drains; the chunking keeps any single write bounded so
/// a large payload cannot monopolize user-space memory in one burst.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for frame in batch {
        writer.write_all(&frame.header).await?;

        for chunk in frame.payload.chunks(CHUNK_SIZE) {
            writer.write_all(chunk).await?;
        }
    }

    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;
    use std::io::Cursor;
    use tokio::io::duplex;

    #[test]
    fn test_outbound_frame_header() {
        let frame = OutboundFrame::new(Bytes::from_static(b"hello"));
        assert_eq!(frame.header, [0, 0, 0, 5]);
        assert_eq!(frame.size(), LEN_PREFIX_SIZE + 5);
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        handle
            .send(OutboundFrame::new(Bytes::from_static(b"hello")))
            .await
            .unwrap();

        let mut buf = vec![0u8; 64];
        let n = tokio::io::AsyncReadExt::read(&mut server, &mut buf)
            .await
            .unwrap();

        assert_eq!(n, LEN_PREFIX_SIZE + 5);
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[4..9], b"hello");
    }

    #[tokio::test]
    async fn test_frames_never_interleave() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task_default(client);

        for i in 0..20u8 {
            let payload = Bytes::from(vec![i; 100 + i as usize]);
            handle.send(OutboundFrame::new(payload)).await.unwrap();
        }
        drop(handle);

        let mut buffer = FrameBuffer::new();
        let mut received = Vec::new();
        let mut buf = vec![0u8; 4096];

        while received.len() < 20 {
            let n = tokio::io::AsyncReadExt::read(&mut server, &mut buf)
                .await
                .unwrap();
            assert_ne!(n, 0, "stream ended early");
            received.extend(buffer.push(&buf[..n]).unwrap());
        }

        for (i, payload) in received.iter().enumerate() {
            assert_eq!(payload.len(), 100 + i);
            assert!(payload.iter().all(|&b| b == i as u8));
        }
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (client, server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(server);
        task.abort();
        let _ = task.await;

        // Channel is closed once the task is gone
        let result = handle
            .send(OutboundFrame::new(Bytes::from_static(b"x")))
            .await;
        assert!(matches!(result, Err(SockwireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_backpressure_timeout() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(AtomicUsize::new(100)); // At capacity, never drains

        let handle = WriterHandle {
            tx,
            pending,
            max_pending: 100,
            timeout: Duration::from_millis(20),
        };

        let result = handle.send(OutboundFrame::new(Bytes::new())).await;
        assert!(matches!(result, Err(SockwireError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_pending_count_drains() {
        let (client, _server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task_default(client);

        assert_eq!(handle.pending_count(), 0);
        assert!(!handle.is_backpressure_active());

        for _ in 0..10 {
            handle
                .send(OutboundFrame::new(Bytes::from_static(b"data")))
                .await
                .unwrap();
        }

        // The writer task drains the queue shortly after
        let deadline = Instant::now() + Duration::from_secs(1);
        while handle.pending_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());

        let batch: Vec<_> = (0..5)
            .map(|_| OutboundFrame::new(Bytes::from_static(b"abc")))
            .collect();

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        assert_eq!(written.len(), 5 * (LEN_PREFIX_SIZE + 3));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
