//! Transport module - text frame streams.
//!
//! The multiplexer is written against two small traits:
//! - [`FrameSink`] - ordered outbound text frames (owned by the writer task)
//! - [`FrameSource`] - ordered inbound text frames (owned by the frame reader)
//!
//! Implementations:
//! - [`ws`] - WebSocket over `tokio-tungstenite`
//! - [`memory`] - in-process channel pair for tests and embedding

pub mod memory;
pub mod ws;

use async_trait::async_trait;

use crate::error::Result;

/// Outbound half of a frame stream.
///
/// `feed` queues a frame, `flush` pushes everything queued to the peer.
#[async_trait]
pub trait FrameSink: Send {
    /// Queue one text frame.
    async fn feed(&mut self, text: String) -> Result<()>;

    /// Flush queued frames.
    async fn flush(&mut self) -> Result<()>;

    /// Flush and close the stream.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a frame stream.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Next text frame, `None` once the peer has ended the stream.
    async fn recv(&mut self) -> Option<Result<String>>;
}

/// Boxed outbound half.
pub type BoxedSink = Box<dyn FrameSink>;

/// Boxed inbound half.
pub type BoxedSource = Box<dyn FrameSource>;

pub use memory::{channel, MemoryPeer, MemorySink, MemorySource};
pub use ws::{connect, WsSink, WsSource};
