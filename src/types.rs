//! Domain records decoded from reply and push payloads.
//!
//! The server is loose about numeric vs string ids, so id-like text fields
//! accept either form.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::codec::JsonCodec;
use crate::error::{Result, WebMaxError};

/// One name entry of a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Name {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Contact profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: i64,
    #[serde(default)]
    pub account_status: Option<i64>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub base_raw_url: Option<String>,
    #[serde(default)]
    pub names: Vec<Name>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub phone: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub photo_id: Option<i64>,
    #[serde(default)]
    pub update_time: Option<i64>,
}

impl Contact {
    /// First full name, if any.
    pub fn display_name(&self) -> Option<&str> {
        self.names.iter().find_map(|n| n.name.as_deref())
    }
}

/// A user: a contact profile as returned by login or lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub contact: Contact,
}

impl User {
    /// Build from a profile payload.
    ///
    /// Accepts both `{ "contact": { .. } }` and a bare contact object.
    pub fn from_profile(profile: Value) -> Result<Self> {
        let contact = match profile {
            Value::Object(mut map) if map.contains_key("contact") => {
                map.remove("contact").unwrap_or(Value::Null)
            }
            other => other,
        };
        Ok(User {
            contact: JsonCodec::from_value(contact)?,
        })
    }

    /// Contact id.
    #[inline]
    pub fn id(&self) -> i64 {
        self.contact.id
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Chat the message belongs to (taken from the enclosing payload).
    #[serde(default)]
    pub chat_id: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub sender: Option<i64>,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub update_time: Option<i64>,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default)]
    pub cid: Option<i64>,
    #[serde(default)]
    pub attaches: Vec<Value>,
    #[serde(default)]
    pub link: Option<Value>,
}

impl Message {
    /// Decode from a `{ "chatId", "message": { .. } }` payload.
    ///
    /// `chat_id` overrides the payload's `chatId` when the reply omits it
    /// (edit replies do).
    pub fn from_payload(payload: &Value, chat_id: Option<i64>) -> Result<Self> {
        let body = payload
            .get("message")
            .cloned()
            .ok_or_else(|| WebMaxError::Protocol("payload has no message".to_string()))?;
        let mut message: Message = JsonCodec::from_value(body)?;
        message.chat_id = match chat_id {
            Some(id) => id,
            None => payload
                .get("chatId")
                .and_then(Value::as_i64)
                .ok_or_else(|| WebMaxError::Protocol("payload has no chatId".to_string()))?,
        };
        Ok(message)
    }

    /// True if the message has no text body.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}
