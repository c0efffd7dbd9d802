//! In-memory transport.
//!
//! [`channel`] returns the client's two halves plus a [`MemoryPeer`] that
//! plays the server: it reads what the client wrote and injects frames,
//! transport errors or end-of-stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{FrameSink, FrameSource};
use crate::codec::JsonCodec;
use crate::error::{Result, WebMaxError};
use crate::protocol::Frame;

/// Create a connected in-memory transport.
pub fn channel() -> (MemorySink, MemorySource, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let flushes = Arc::new(AtomicUsize::new(0));

    let sink = MemorySink {
        tx: Some(out_tx),
        buffer: Vec::new(),
        flushes: flushes.clone(),
    };
    let source = MemorySource { rx: in_rx };
    let peer = MemoryPeer {
        to_client: Some(in_tx),
        from_client: out_rx,
        flushes,
    };
    (sink, source, peer)
}

/// Client write half.
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
    buffer: Vec<String>,
    flushes: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn feed(&mut self, text: String) -> Result<()> {
        if self.tx.is_none() {
            return Err(WebMaxError::ConnectionClosed);
        }
        self.buffer.push(text);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(WebMaxError::ConnectionClosed)?;
        for text in self.buffer.drain(..) {
            tx.send(text).map_err(|_| WebMaxError::ConnectionClosed)?;
        }
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.tx.is_some() {
            self.flush().await?;
        }
        self.tx = None;
        Ok(())
    }
}

/// Client read half.
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Result<String>>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }
}

/// The far end of an in-memory transport.
pub struct MemoryPeer {
    to_client: Option<mpsc::UnboundedSender<Result<String>>>,
    from_client: mpsc::UnboundedReceiver<String>,
    flushes: Arc<AtomicUsize>,
}

impl MemoryPeer {
    /// Deliver a raw text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.inject(Ok(text.into()))
    }

    /// Encode and deliver a frame to the client.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send_text(JsonCodec::encode_frame(frame)?)
    }

    /// Make the client's next read fail with an I/O error.
    pub fn fail(&self, message: &str) -> Result<()> {
        self.inject(Err(WebMaxError::Io(std::io::Error::other(message.to_string()))))
    }

    fn inject(&self, item: Result<String>) -> Result<()> {
        let tx = self.to_client.as_ref().ok_or(WebMaxError::ConnectionClosed)?;
        tx.send(item).map_err(|_| WebMaxError::ConnectionClosed)
    }

    /// End the inbound stream.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Next text frame the client flushed, `None` once the client closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame the client flushed, decoded.
    pub async fn recv_frame(&mut self) -> Result<Frame> {
        let text = self
            .recv_text()
            .await
            .ok_or(WebMaxError::ConnectionClosed)?;
        JsonCodec::decode_frame(&text)
    }

    /// A flushed frame if one is already waiting.
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Number of flushes the client performed.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_feed_is_invisible_until_flush() {
        let (mut sink, _source, mut peer) = channel();

        sink.feed("a".to_string()).await.unwrap();
        sink.feed("b".to_string()).await.unwrap();
        assert!(peer.try_recv_text().is_none());

        sink.flush().await.unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("a"));
        assert_eq!(peer.recv_text().await.as_deref(), Some("b"));
        assert_eq!(peer.flush_count(), 1);
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (mut sink, _source, mut peer) = channel();
        sink.feed("last".to_string()).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(peer.recv_text().await.as_deref(), Some("last"));
        assert!(peer.recv_text().await.is_none());
        assert!(matches!(
            sink.feed("late".to_string()).await,
            Err(WebMaxError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_peer_frames_reach_source() {
        let (_sink, mut source, mut peer) = channel();
        let frame = Frame::push(1, 128, json!({"chatId": 1}));
        peer.send_frame(&frame).unwrap();
        peer.fail("reset").unwrap();
        peer.close();

        let text = source.recv().await.unwrap().unwrap();
        assert_eq!(JsonCodec::decode_frame(&text).unwrap(), frame);
        assert!(matches!(source.recv().await, Some(Err(WebMaxError::Io(_)))));
        assert!(source.recv().await.is_none());
    }
}
