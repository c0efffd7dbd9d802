//! JSON codec using `serde_json`.
//!
//! Frames travel as one JSON object per WebSocket text message. Decoding a
//! frame maps every failure to [`WebMaxError::ProtocolDecode`], which the
//! frame reader treats as fatal for the connection.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, WebMaxError};
use crate::protocol::Frame;

/// JSON codec for frames and structured payloads.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to a JSON string.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    /// Decode a JSON string to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode a frame for the wire.
    #[inline]
    pub fn encode_frame(frame: &Frame) -> Result<String> {
        Self::encode(frame)
    }

    /// Decode an inbound frame.
    pub fn decode_frame(text: &str) -> Result<Frame> {
        serde_json::from_str(text).map_err(|e| WebMaxError::ProtocolDecode(e.to_string()))
    }

    /// Convert a decoded payload into a typed value.
    pub fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    #[serde(rename_all = "camelCase")]
    struct TestPayload {
        chat_id: i64,
        text: String,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestPayload {
            chat_id: 5,
            text: "hello".to_string(),
        };
        let encoded = JsonCodec::encode(&original).unwrap();
        assert!(encoded.contains("chatId"));

        let decoded: TestPayload = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_frame() {
        let frame = JsonCodec::decode_frame(
            r#"{"ver":11,"cmd":1,"seq":7,"opcode":64,"payload":{"chatId":1}}"#,
        )
        .unwrap();

        assert_eq!(frame.seq, 7);
        assert_eq!(frame.opcode, 64);
        assert!(frame.is_response());
        assert_eq!(frame.payload["chatId"], 1);
    }

    #[test]
    fn test_decode_frame_garbage_is_protocol_error() {
        let err = JsonCodec::decode_frame("{not json").unwrap_err();
        assert!(matches!(err, WebMaxError::ProtocolDecode(_)));
    }

    #[test]
    fn test_decode_frame_missing_opcode_is_protocol_error() {
        let err = JsonCodec::decode_frame(r#"{"seq": 1}"#).unwrap_err();
        assert!(matches!(err, WebMaxError::ProtocolDecode(_)));
    }

    #[test]
    fn test_from_value_type_mismatch() {
        let result: Result<TestPayload> = JsonCodec::from_value(json!({"chatId": "x"}));
        assert!(matches!(result, Err(WebMaxError::Json(_))));
    }
}
