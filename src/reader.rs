//! Frame reader: the single consumer of the inbound stream.
//!
//! One reader task per connection pulls frames off the
//! [`FrameSource`](crate::transport::FrameSource) in arrival order and routes
//! each one:
//!
//! 1. server ping: acknowledged through the writer, nothing else sees it
//! 2. configured push opcode: handed to the [`PushSink`]
//! 3. sequence matches a pending request: resolved in the pending table
//! 4. unmatched server-initiated frame: handed to the [`PushSink`]
//! 5. unmatched reply (late or unknown): dropped
//!
//! Any undecodable frame ends the loop; frame boundaries can no longer be
//! trusted after one.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::JsonCodec;
use crate::error::{CloseReason, WebMaxError};
use crate::pending::PendingRequestTable;
use crate::protocol::{opcode, Frame, SequenceAllocator};
use crate::transport::BoxedSource;
use crate::writer::{OutboundFrame, WriterHandle};

/// Receiver of push frames.
///
/// Called on the reader task, so implementations must not block.
pub trait PushSink: Send + Sync + 'static {
    /// Accept one push frame.
    fn push(&self, frame: Frame);
}

impl PushSink for mpsc::UnboundedSender<Frame> {
    fn push(&self, frame: Frame) {
        if self.send(frame).is_err() {
            tracing::debug!("push receiver dropped");
        }
    }
}

/// What the reader did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Server ping, acknowledged.
    PingAcked,
    /// Delivered to a pending request.
    Resolved,
    /// Handed to the push sink.
    Pushed,
    /// No taker.
    Dropped,
}

/// The reader half of a multiplexed connection.
pub struct FrameReader {
    source: BoxedSource,
    pending: Arc<PendingRequestTable>,
    sequence: Arc<SequenceAllocator>,
    writer: WriterHandle,
    push: Arc<dyn PushSink>,
    push_opcodes: HashSet<u16>,
    protocol_version: u8,
}

impl FrameReader {
    /// Create a reader. Nothing is read until [`run`](Self::run).
    pub fn new(
        source: BoxedSource,
        pending: Arc<PendingRequestTable>,
        sequence: Arc<SequenceAllocator>,
        writer: WriterHandle,
        push: Arc<dyn PushSink>,
        push_opcodes: HashSet<u16>,
        protocol_version: u8,
    ) -> Self {
        Self {
            source,
            pending,
            sequence,
            writer,
            push,
            push_opcodes,
            protocol_version,
        }
    }

    /// Read and route frames until the stream ends, fails, or `shutdown`
    /// fires. Returns why the loop stopped.
    pub async fn run(mut self, shutdown: CancellationToken) -> CloseReason {
        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return CloseReason::Stopped,
                item = self.source.recv() => item,
            };

            let text = match item {
                Some(Ok(text)) => text,
                Some(Err(WebMaxError::ProtocolDecode(e))) => {
                    tracing::error!("undecodable frame: {}", e);
                    return CloseReason::Decode(e);
                }
                Some(Err(e)) => {
                    tracing::error!("read failed: {}", e);
                    return CloseReason::Transport(e.to_string());
                }
                None => {
                    tracing::info!("inbound stream ended");
                    return CloseReason::StreamEnded;
                }
            };

            match JsonCodec::decode_frame(&text) {
                Ok(frame) => {
                    self.route(frame);
                }
                Err(e) => {
                    tracing::error!(len = text.len(), "undecodable frame: {}", e);
                    return CloseReason::Decode(e.to_string());
                }
            }
        }
    }

    /// Route one decoded frame.
    ///
    /// Never waits: a ping ack that cannot be queued right away is dropped.
    pub fn route(&self, frame: Frame) -> Routed {
        let (seq, op) = (frame.seq, frame.opcode);

        if op == opcode::PING && !frame.is_response() {
            self.ack_ping(seq);
            return Routed::PingAcked;
        }

        if self.push_opcodes.contains(&op) && !frame.is_response() {
            tracing::debug!(seq, opcode = op, "push");
            self.push.push(frame);
            return Routed::Pushed;
        }

        if frame.is_response() {
            if self.pending.resolve(seq, frame) {
                tracing::debug!(seq, opcode = op, "reply");
                return Routed::Resolved;
            }
            tracing::debug!(seq, opcode = op, "dropping unmatched reply");
            return Routed::Dropped;
        }

        // Correlation is by sequence alone, so a reply without `cmd` still
        // resolves; an unmatched server-initiated frame becomes a push.
        if self.pending.resolve(seq, frame.clone()) {
            tracing::debug!(seq, opcode = op, "reply");
            return Routed::Resolved;
        }
        tracing::debug!(seq, opcode = op, "unsolicited frame routed as push");
        self.push.push(frame);
        Routed::Pushed
    }

    fn ack_ping(&self, ping_seq: u64) {
        let ack = Frame::request(
            self.protocol_version,
            self.sequence.next(),
            opcode::PING,
            json!({ "interactive": false }),
        );
        tracing::trace!(ping_seq, ack_seq = ack.seq, "acknowledging ping");

        let result = match OutboundFrame::encode(&ack) {
            Ok(out) => self.writer.try_send(out),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(ping_seq, "dropping ping ack: {}", e);
        }
    }
}
