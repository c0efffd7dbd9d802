//! Dedicated writer task.
//!
//! Every outbound frame goes through one task that owns the
//! [`FrameSink`](crate::transport::FrameSink). Callers only hold a cloneable
//! [`WriterHandle`], so frames are never interleaved and no caller waits on
//! a lock around the socket.
//!
//! # Architecture
//!
//! ```text
//! send_and_await ──┐
//! ping acks      ──┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► FrameSink
//! handlers       ──┘
//! ```
//!
//! Frames that are already queued when the task wakes are fed as one batch
//! and flushed once. On shutdown the task writes whatever is still queued,
//! then closes the sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::JsonCodec;
use crate::error::{Result, WebMaxError};
use crate::protocol::Frame;
use crate::transport::BoxedSink;

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single flush.
const MAX_BATCH_SIZE: usize = 64;

/// A frame encoded and ready for the sink.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Sequence number (for logging).
    pub seq: u64,
    /// Opcode (for logging).
    pub opcode: u16,
    /// Encoded JSON text.
    pub text: String,
}

impl OutboundFrame {
    /// Encode `frame`.
    pub fn encode(frame: &Frame) -> Result<Self> {
        Ok(Self {
            seq: frame.seq,
            opcode: frame.opcode,
            text: JsonCodec::encode_frame(frame)?,
        })
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.text.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
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
/// Cheap to clone; all clones feed the same task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    /// Frames accepted but not yet flushed.
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Queue a frame for writing.
    ///
    /// Waits while backpressure is active, failing with
    /// [`WebMaxError::BackpressureTimeout`] after the configured duration.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            WebMaxError::ConnectionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }
            if self.tx.is_closed() {
                return Err(WebMaxError::ConnectionClosed);
            }
            if start.elapsed() > self.timeout {
                tracing::warn!(pending = self.pending_count(), "writer backpressure timeout");
                return Err(WebMaxError::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(WebMaxError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => WebMaxError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => WebMaxError::ConnectionClosed,
            }
        })
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Frames accepted but not yet flushed.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the writer task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task.
///
/// The task runs until every handle is dropped, `shutdown` is cancelled, or
/// the sink fails. The join handle yields the sink error, if any.
pub fn spawn_writer_task(
    sink: BoxedSink,
    config: WriterConfig,
    shutdown: CancellationToken,
) -> (WriterHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(writer_loop(rx, sink, pending, shutdown));

    (handle, task)
}

async fn writer_loop(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut sink: BoxedSink,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let first = tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(f) => f,
                None => break,
            },
            _ = shutdown.cancelled() => {
                rx.close();
                drain(&mut rx, &mut sink, &pending).await?;
                break;
            }
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
        let result = write_batch(&mut sink, batch).await;
        pending.fetch_sub(batch_size, Ordering::Release);
        result?;
    }

    tracing::debug!("writer task closing sink");
    sink.close().await
}

/// Write everything still queued after the channel was closed.
async fn drain(
    rx: &mut mpsc::Receiver<OutboundFrame>,
    sink: &mut BoxedSink,
    pending: &AtomicUsize,
) -> Result<()> {
    let mut batch = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        batch.push(frame);
    }
    if batch.is_empty() {
        return Ok(());
    }

    tracing::debug!(frames = batch.len(), "draining writer queue");
    let batch_size = batch.len();
    let result = write_batch(sink, batch).await;
    pending.fetch_sub(batch_size, Ordering::Release);
    result
}

/// Feed every frame of the batch, then flush once.
async fn write_batch(sink: &mut BoxedSink, batch: Vec<OutboundFrame>) -> Result<()> {
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let count = batch.len();

    for frame in batch {
        tracing::trace!(seq = frame.seq, opcode = frame.opcode, "writing frame");
        sink.feed(frame.text).await?;
    }
    sink.flush().await?;

    tracing::trace!(frames = count, bytes = total_size, "flushed batch");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::opcode;
    use crate::transport::{self, MemoryPeer};
    use serde_json::json;

    fn frame(seq: u64) -> OutboundFrame {
        OutboundFrame::encode(&Frame::request(11, seq, opcode::MSG_SEND, json!({"n": seq})))
            .unwrap()
    }

    fn spawn_default() -> (
        WriterHandle,
        JoinHandle<Result<()>>,
        MemoryPeer,
        CancellationToken,
    ) {
        let (sink, _source, peer) = transport::channel();
        let token = CancellationToken::new();
        let (handle, task) =
            spawn_writer_task(Box::new(sink), WriterConfig::default(), token.clone());
        (handle, task, peer, token)
    }

    #[test]
    fn test_outbound_frame_encode() {
        let frame = frame(42);
        assert_eq!(frame.seq, 42);
        assert_eq!(frame.opcode, opcode::MSG_SEND);
        assert!(frame.text.contains("\"seq\":42"));
        assert_eq!(frame.size(), frame.text.len());
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
        let (handle, _task, mut peer, _token) = spawn_default();

        handle.send(frame(1)).await.unwrap();

        let written = peer.recv_frame().await.unwrap();
        assert_eq!(written.seq, 1);
        assert_eq!(written.payload["n"], 1);
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let (handle, _task, mut peer, _token) = spawn_default();

        for seq in 0..10 {
            handle.send(frame(seq)).await.unwrap();
        }

        for seq in 0..10 {
            assert_eq!(peer.recv_frame().await.unwrap().seq, seq);
        }
        assert!(peer.flush_count() <= 10);
    }

    #[tokio::test]
    async fn test_writer_batches_queued_frames() {
        let (sink, _source, mut peer) = transport::channel();
        let (tx, rx) = mpsc::channel(16);
        let pending = Arc::new(AtomicUsize::new(0));
        let handle = WriterHandle::new(tx, pending.clone(), 100, Duration::from_secs(1));

        // Queue before the loop runs so all five land in one batch.
        for seq in 0..5 {
            handle.send(frame(seq)).await.unwrap();
        }
        assert_eq!(handle.pending_count(), 5);

        let token = CancellationToken::new();
        let task = tokio::spawn(writer_loop(rx, Box::new(sink), pending, token));
        for seq in 0..5 {
            assert_eq!(peer.recv_frame().await.unwrap().seq, seq);
        }
        assert_eq!(peer.flush_count(), 1);
        assert_eq!(handle.pending_count(), 0);

        drop(handle);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(AtomicUsize::new(100));

        let handle = WriterHandle::new(tx, pending, 100, Duration::from_secs(1));

        let result = handle.try_send(frame(1));
        assert!(matches!(result, Err(WebMaxError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_send_times_out_under_backpressure() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(AtomicUsize::new(1));

        let handle = WriterHandle::new(tx, pending, 1, Duration::from_millis(5));

        assert!(handle.is_backpressure_active());
        let result = handle.send(frame(1)).await;
        assert!(matches!(result, Err(WebMaxError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (handle, task, mut peer, _token) = spawn_default();

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
        assert!(peer.recv_text().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_drains_then_closes() {
        let (sink, _source, mut peer) = transport::channel();
        let (tx, rx) = mpsc::channel(16);
        let pending = Arc::new(AtomicUsize::new(0));
        let handle = WriterHandle::new(tx, pending.clone(), 100, Duration::from_secs(1));

        handle.send(frame(1)).await.unwrap();
        handle.send(frame(2)).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let task = tokio::spawn(writer_loop(rx, Box::new(sink), pending, token));
        task.await.unwrap().unwrap();

        assert_eq!(peer.recv_frame().await.unwrap().seq, 1);
        assert_eq!(peer.recv_frame().await.unwrap().seq, 2);
        assert!(peer.recv_text().await.is_none());
        assert!(matches!(
            handle.send(frame(3)).await,
            Err(WebMaxError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_sink_failure_ends_task_with_error() {
        let (sink, _source, peer) = transport::channel();
        let token = CancellationToken::new();
        let (handle, task) =
            spawn_writer_task(Box::new(sink), WriterConfig::default(), token);

        drop(peer);
        handle.send(frame(1)).await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(WebMaxError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
    }
}
