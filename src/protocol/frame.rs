//! Frame struct with typed accessors.
//!
//! Represents one protocol frame. The payload stays an opaque
//! `serde_json::Value`; its shape depends on the opcode.
//!
//! # Example
//!
//! ```
//! use webmax_client::protocol::{cmd, opcode, Frame};
//! use serde_json::json;
//!
//! let frame = Frame::request(11, 7, opcode::MSG_SEND, json!({ "text": "hi" }));
//!
//! assert_eq!(frame.seq, 7);
//! assert_eq!(frame.cmd, cmd::REQUEST);
//! assert!(!frame.is_response());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version sent in the `ver` field.
pub const PROTOCOL_VERSION: u8 = 11;

/// Values of the `cmd` field.
pub mod cmd {
    /// Client or server initiated request.
    pub const REQUEST: u8 = 0;
    /// Reply to a request.
    pub const RESPONSE: u8 = 1;
    /// Error reply to a request.
    pub const ERROR: u8 = 3;
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Protocol version.
    #[serde(default)]
    pub ver: u8,
    /// Request / response marker, see [`cmd`].
    #[serde(default)]
    pub cmd: u8,
    /// Caller-assigned sequence number, echoed on replies.
    #[serde(default)]
    pub seq: u64,
    /// Message kind.
    pub opcode: u16,
    /// Opaque payload.
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    /// Build an outbound request frame.
    pub fn request(ver: u8, seq: u64, opcode: u16, payload: Value) -> Self {
        Self {
            ver,
            cmd: cmd::REQUEST,
            seq,
            opcode,
            payload,
        }
    }

    /// Build a reply to `request` (used by test peers and demos).
    pub fn reply_to(request: &Frame, payload: Value) -> Self {
        Self {
            ver: request.ver,
            cmd: cmd::RESPONSE,
            seq: request.seq,
            opcode: request.opcode,
            payload,
        }
    }

    /// Build a server-initiated frame (push or ping).
    pub fn push(seq: u64, opcode: u16, payload: Value) -> Self {
        Self {
            ver: PROTOCOL_VERSION,
            cmd: cmd::REQUEST,
            seq,
            opcode,
            payload,
        }
    }

    /// Check if this is a request.
    #[inline]
    pub fn is_request(&self) -> bool {
        self.cmd == cmd::REQUEST
    }

    /// Check if this is a reply (successful or error).
    #[inline]
    pub fn is_response(&self) -> bool {
        self.cmd == cmd::RESPONSE || self.cmd == cmd::ERROR
    }

    /// Check if this is an error reply.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.cmd == cmd::ERROR
    }
}
