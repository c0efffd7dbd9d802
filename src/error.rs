//! Error types for webmax-client.

use std::fmt;

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum WebMaxError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error for payloads.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A correlated request did not receive its reply before the deadline.
    #[error("Request {seq} timed out")]
    Timeout {
        /// Sequence number of the expired request.
        seq: u64,
    },

    /// The connection was stopped or lost while the call was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An inbound frame could not be decoded.
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// A sequence number was registered twice while still pending.
    #[error("Duplicate pending sequence: {0}")]
    DuplicateSequence(u64),

    /// A filter needing the authenticated identity ran before login.
    #[error("No authenticated user, authenticate first")]
    Unauthenticated,

    /// Connecting requires an auth token that was never set.
    #[error("Auth token is not set")]
    MissingToken,

    /// The server answered with an error payload.
    #[error("{title} ({error})")]
    Server {
        /// Machine-readable error code, e.g. `verify.code.wrong`.
        error: String,
        /// Human-readable message from the server.
        title: String,
    },

    /// Contact lookup returned no contact.
    #[error("User not found")]
    UserNotFound,

    /// Caller passed unusable arguments.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Reply payload did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl WebMaxError {
    /// True if the server rejected a verification code.
    pub fn is_wrong_code(&self) -> bool {
        matches!(self, WebMaxError::Server { error, .. } if error == "verify.code.wrong")
    }

    /// True for failures a caller may retry on the same connection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebMaxError::Timeout { .. } | WebMaxError::BackpressureTimeout
        )
    }
}

/// Why a connection ended.
///
/// Carried by pending-request cancellation and by
/// [`ConnectionEvent::Closed`](crate::mux::ConnectionEvent::Closed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `stop()` was called.
    Stopped,
    /// The peer ended the stream.
    StreamEnded,
    /// Reading or writing the stream failed.
    Transport(String),
    /// An inbound frame was undecodable; the stream can no longer be trusted.
    Decode(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Stopped => write!(f, "stopped"),
            CloseReason::StreamEnded => write!(f, "stream ended"),
            CloseReason::Transport(e) => write!(f, "transport failure: {}", e),
            CloseReason::Decode(e) => write!(f, "decode failure: {}", e),
        }
    }
}

/// Result type alias using WebMaxError.
pub type Result<T> = std::result::Result<T, WebMaxError>;
