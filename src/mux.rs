//! Frame multiplexer.
//!
//! Owns one connection: a writer task for the outbound half, a single
//! [`FrameReader`] for the inbound half, the [`PendingRequestTable`] that
//! correlates replies, and the [`SequenceAllocator`] that numbers frames.
//!
//! ```text
//!                 ┌──────────── Multiplexer ────────────┐
//! send_and_await ─┼─► seq ─► pending.register ─► writer ─┼─► sink
//!        ▲        │               ▲                      │
//!        └─ slot ─┼─── resolve ───┴──── FrameReader ◄────┼── source
//!                 │                          └─► PushSink (handlers)
//!                 └──────────────────────────────────────┘
//! ```
//!
//! A supervisor task watches the reader and writer. Whichever stops first
//! decides the [`CloseReason`]; shutdown then cancels every pending request,
//! stops the other task, and broadcasts [`ConnectionEvent::Closed`] once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CloseReason, Result, WebMaxError};
use crate::handler::HandlerId;
use crate::pending::{PendingRequestTable, Resolution};
use crate::protocol::{opcode, Frame, SequenceAllocator, PROTOCOL_VERSION};
use crate::reader::{FrameReader, PushSink};
use crate::transport::{BoxedSink, BoxedSource};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Capacity of the connection event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Settings for one multiplexed connection.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// `ver` stamped on outbound frames.
    pub protocol_version: u8,
    /// Opcodes that are always pushes and never correlate.
    pub push_opcodes: HashSet<u16>,
    /// Writer task settings.
    pub writer: WriterConfig,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            push_opcodes: HashSet::from([opcode::NOTIF_MESSAGE]),
            writer: WriterConfig::default(),
        }
    }
}

/// Connection-level notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection ended. Sent once per connection.
    Closed(CloseReason),
    /// A handler's filter could not be evaluated for an event.
    FilterFailed {
        handler: HandlerId,
        error: String,
    },
    /// A handler returned an error or panicked.
    HandlerFailed {
        handler: HandlerId,
        error: String,
    },
}

/// State shared with the supervisor task.
struct Shared {
    pending: Arc<PendingRequestTable>,
    shutdown: CancellationToken,
    /// Cancelled once every task has exited and the sink is closed.
    finished: CancellationToken,
    reason: Mutex<Option<CloseReason>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Shared {
    /// Begin shutdown. Only the first call has any effect.
    fn shutdown(&self, reason: CloseReason) {
        {
            let mut current = self.reason.lock();
            if current.is_some() {
                return;
            }
            *current = Some(reason.clone());
        }

        let cancelled = self.pending.cancel_all(&reason);
        self.shutdown.cancel();

        match &reason {
            CloseReason::Stopped => tracing::info!(cancelled, "connection stopped"),
            CloseReason::StreamEnded => tracing::warn!(cancelled, "connection ended by peer"),
            other => tracing::error!(cancelled, "connection lost: {}", other),
        }
        let _ = self.events.send(ConnectionEvent::Closed(reason));
    }
}

/// Parts handed to the background tasks on `start`.
struct Idle {
    source: BoxedSource,
    push: Arc<dyn PushSink>,
    writer_task: JoinHandle<Result<()>>,
}

/// A multiplexed connection.
pub struct Multiplexer {
    shared: Arc<Shared>,
    sequence: Arc<SequenceAllocator>,
    writer: WriterHandle,
    push_opcodes: HashSet<u16>,
    protocol_version: u8,
    idle: Mutex<Option<Idle>>,
}

impl Multiplexer {
    /// Wrap a transport. The writer task starts immediately; nothing is
    /// read until [`start`](Self::start).
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        sink: BoxedSink,
        source: BoxedSource,
        push: Arc<dyn PushSink>,
        config: MuxConfig,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let (writer, writer_task) = spawn_writer_task(sink, config.writer, shutdown.clone());

        Self {
            shared: Arc::new(Shared {
                pending: Arc::new(PendingRequestTable::new()),
                shutdown,
                finished: CancellationToken::new(),
                reason: Mutex::new(None),
                events,
            }),
            sequence: Arc::new(SequenceAllocator::default()),
            writer,
            push_opcodes: config.push_opcodes,
            protocol_version: config.protocol_version,
            idle: Mutex::new(Some(Idle {
                source,
                push,
                writer_task,
            })),
        }
    }

    /// Start the frame reader. Calling it again is a no-op.
    pub fn start(&self) {
        let Some(idle) = self.idle.lock().take() else {
            return;
        };

        let reader = FrameReader::new(
            idle.source,
            self.shared.pending.clone(),
            self.sequence.clone(),
            self.writer.clone(),
            idle.push,
            self.push_opcodes.clone(),
            self.protocol_version,
        );
        let reader_task = tokio::spawn(reader.run(self.shared.shutdown.clone()));

        tracing::debug!("multiplexer started");
        tokio::spawn(supervise(self.shared.clone(), reader_task, idle.writer_task));
    }

    /// Stop the connection and wait until it is fully closed.
    ///
    /// Pending requests fail with [`WebMaxError::ConnectionClosed`]. Frames
    /// already queued for writing are flushed before the stream closes.
    pub async fn stop(&self) {
        self.shared.shutdown(CloseReason::Stopped);

        let idle = self.idle.lock().take();
        if let Some(idle) = idle {
            // Never started: the source is dropped here, unread.
            if let Ok(Err(e)) = idle.writer_task.await {
                tracing::debug!("writer failed while stopping: {}", e);
            }
            self.shared.finished.cancel();
        }

        self.closed().await;
    }

    /// Wait until the connection has fully closed.
    pub async fn closed(&self) {
        self.shared.finished.cancelled().await;
    }

    /// Send a request and wait for the reply with the same sequence number.
    ///
    /// Returns the reply payload. With `timeout: None` the call waits until
    /// the reply arrives or the connection closes.
    pub async fn send_and_await(
        &self,
        opcode: u16,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let seq = self.sequence.next();
        let frame = Frame::request(self.protocol_version, seq, opcode, payload);
        let out = OutboundFrame::encode(&frame)?;

        // Registered before writing so a fast reply cannot be missed.
        let mut slot = self.shared.pending.register(seq, opcode)?;
        self.writer.send(out).await?;
        tracing::debug!(seq, opcode, "request sent");

        let resolution = match timeout {
            Some(limit) => match tokio::time::timeout(limit, slot.recv()).await {
                Ok(resolution) => resolution,
                Err(_) => {
                    self.shared.pending.expire(seq);
                    // The reply may have won the race against `expire`.
                    slot.try_recv().unwrap_or(Resolution::Expired)
                }
            },
            None => slot.recv().await,
        };

        match resolution {
            Resolution::Reply(reply) => Ok(reply.payload),
            Resolution::Expired => {
                tracing::warn!(seq, opcode, "request timed out");
                Err(WebMaxError::Timeout { seq })
            }
            Resolution::Cancelled(reason) => {
                tracing::debug!(seq, opcode, %reason, "request cancelled");
                match reason {
                    CloseReason::Decode(e) => Err(WebMaxError::ProtocolDecode(e)),
                    _ => Err(WebMaxError::ConnectionClosed),
                }
            }
        }
    }

    /// Send a frame without waiting for any reply.
    ///
    /// Returns the sequence number the frame was sent with.
    pub async fn send_fire_and_forget(&self, opcode: u16, payload: Value) -> Result<u64> {
        if self.shared.shutdown.is_cancelled() {
            return Err(WebMaxError::ConnectionClosed);
        }

        let seq = self.sequence.next();
        let frame = Frame::request(self.protocol_version, seq, opcode, payload);
        self.writer.send(OutboundFrame::encode(&frame)?).await?;
        tracing::debug!(seq, opcode, "frame sent");
        Ok(seq)
    }

    /// True between `start` and shutdown.
    pub fn is_running(&self) -> bool {
        self.idle.lock().is_none() && !self.shared.shutdown.is_cancelled()
    }

    /// Why the connection closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.reason.lock().clone()
    }

    /// Number of requests waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Sequence numbers of requests waiting for a reply.
    pub fn pending_sequences(&self) -> Vec<u64> {
        self.shared.pending.sequences()
    }

    /// The sequence number the next outbound frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.peek()
    }

    /// Subscribe to connection events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shared.shutdown(CloseReason::Stopped);
    }
}

async fn supervise(
    shared: Arc<Shared>,
    mut reader_task: JoinHandle<CloseReason>,
    mut writer_task: JoinHandle<Result<()>>,
) {
    let (reader_done, writer_done) = tokio::select! {
        biased;
        reason = &mut reader_task => {
            let reason = reason
                .unwrap_or_else(|e| CloseReason::Transport(format!("reader task failed: {}", e)));
            shared.shutdown(reason);
            (true, false)
        }
        result = &mut writer_task => {
            let reason = match result {
                Ok(Ok(())) => CloseReason::Stopped,
                Ok(Err(e)) => CloseReason::Transport(e.to_string()),
                Err(e) => CloseReason::Transport(format!("writer task failed: {}", e)),
            };
            shared.shutdown(reason);
            (false, true)
        }
    };

    if !reader_done {
        let _ = reader_task.await;
    }
    if !writer_done {
        if let Ok(Err(e)) = writer_task.await {
            tracing::debug!("writer failed while closing: {}", e);
        }
    }

    tracing::debug!("multiplexer closed");
    shared.finished.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{self, MemoryPeer};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn mux() -> (Multiplexer, MemoryPeer, mpsc::UnboundedReceiver<Frame>) {
        let (sink, source, peer) = transport::channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mux = Multiplexer::new(
            Box::new(sink),
            Box::new(source),
            Arc::new(push_tx),
            MuxConfig::default(),
            events,
        );
        (mux, peer, push_rx)
    }

    #[tokio::test]
    async fn test_send_and_await_returns_reply_payload() {
        let (mux, mut peer, _pushes) = mux();
        mux.start();

        let server = tokio::spawn(async move {
            let request = peer.recv_frame().await.unwrap();
            assert_eq!(request.opcode, opcode::MSG_SEND);
            assert_eq!(request.payload["text"], "hi");
            peer.send_frame(&Frame::reply_to(&request, json!({"ok": true})))
                .unwrap();
            peer
        });

        let reply = mux
            .send_and_await(opcode::MSG_SEND, json!({"text": "hi"}), None)
            .await
            .unwrap();
        assert_eq!(reply, json!({"ok": true}));
        assert_eq!(mux.pending_count(), 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let (mux, mut peer, _pushes) = mux();
        mux.start();

        assert_eq!(mux.send_fire_and_forget(opcode::MSG_DELETE, json!({})).await.unwrap(), 0);
        assert_eq!(mux.send_fire_and_forget(opcode::CONFIG, json!({})).await.unwrap(), 1);
        assert_eq!(mux.next_sequence(), 2);

        assert_eq!(peer.recv_frame().await.unwrap().seq, 0);
        assert_eq!(peer.recv_frame().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_expires() {
        let (mux, mut peer, _pushes) = mux();
        mux.start();

        let err = mux
            .send_and_await(opcode::MSG_SEND, json!({}), Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, WebMaxError::Timeout { seq: 0 }));
        assert_eq!(mux.pending_count(), 0);

        // The late reply is discarded and the connection stays up.
        let request = peer.recv_frame().await.unwrap();
        peer.send_frame(&Frame::reply_to(&request, json!({}))).unwrap();
        tokio::task::yield_now().await;
        assert!(mux.is_running());
    }

    #[tokio::test]
    async fn test_stop_cancels_pending() {
        let (mux, _peer, _pushes) = mux();
        let mux = Arc::new(mux);
        mux.start();

        let caller = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.send_and_await(opcode::MSG_SEND, json!({}), None).await })
        };
        while mux.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        mux.stop().await;
        let result = caller.await.unwrap();
        assert!(matches!(result, Err(WebMaxError::ConnectionClosed)));
        assert_eq!(mux.close_reason(), Some(CloseReason::Stopped));
        assert!(!mux.is_running());
    }

    #[tokio::test]
    async fn test_requests_after_stop_fail() {
        let (mux, _peer, _pushes) = mux();
        mux.start();
        mux.stop().await;

        assert!(matches!(
            mux.send_and_await(opcode::MSG_SEND, json!({}), None).await,
            Err(WebMaxError::ConnectionClosed)
        ));
        assert!(matches!(
            mux.send_fire_and_forget(opcode::MSG_SEND, json!({})).await,
            Err(WebMaxError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (mux, _peer, _pushes) = mux();
        mux.start();
        mux.start();
        assert!(mux.is_running());
        mux.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_closes_stream() {
        let (mux, mut peer, _pushes) = mux();
        mux.stop().await;
        assert!(peer.recv_text().await.is_none());
        assert_eq!(mux.close_reason(), Some(CloseReason::Stopped));
    }

    #[tokio::test]
    async fn test_decode_error_closes_connection() {
        let (mux, peer, _pushes) = mux();
        let mut events = mux.events();
        mux.start();

        peer.send_text("not a frame").unwrap();
        mux.closed().await;

        assert!(matches!(mux.close_reason(), Some(CloseReason::Decode(_))));
        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::Closed(CloseReason::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_end_closes_connection() {
        let (mux, mut peer, _pushes) = mux();
        mux.start();
        peer.close();
        mux.closed().await;
        assert_eq!(mux.close_reason(), Some(CloseReason::StreamEnded));
    }

    #[tokio::test]
    async fn test_writer_failure_closes_connection() {
        let (mux, peer, _pushes) = mux();
        let mux = Arc::new(mux);
        mux.start();
        drop(peer);

        // The first write fails because the peer is gone.
        let _ = mux.send_fire_and_forget(opcode::MSG_SEND, json!({})).await;
        mux.closed().await;
        assert!(matches!(
            mux.close_reason(),
            Some(CloseReason::Transport(_)) | Some(CloseReason::StreamEnded)
        ));
    }
}
