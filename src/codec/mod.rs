//! Codec module - JSON encoding/decoding for frames and payloads.
//!
//! Codecs are marker structs with static methods, selected at compile time.
//!
//! # Example
//!
//! ```
//! use webmax_client::codec::JsonCodec;
//! use webmax_client::protocol::Frame;
//! use serde_json::json;
//!
//! let text = JsonCodec::encode_frame(&Frame::request(11, 1, 64, json!({}))).unwrap();
//! let frame = JsonCodec::decode_frame(&text).unwrap();
//! assert_eq!(frame.seq, 1);
//! ```

mod json;

pub use json::JsonCodec;
