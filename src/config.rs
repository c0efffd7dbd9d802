//! Client configuration.
//!
//! [`ClientConfig`] collects every knob the client and its multiplexer use.
//! All defaults come from the `DEFAULT_*` constants below; the
//! [`ClientBuilder`](crate::ClientBuilder) setters override individual fields.

use std::time::Duration;

use serde::Serialize;

use crate::mux::MuxConfig;
use crate::protocol::{opcode, PROTOCOL_VERSION};
use crate::writer::WriterConfig;

/// Default WebSocket endpoint.
pub const DEFAULT_URL: &str = "wss://ws-api.oneme.ru/websocket";

/// Default deadline for correlated requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default maximum concurrently running push handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Default language for auth requests.
pub const DEFAULT_LANGUAGE: &str = "ru";

/// Device description sent in the session-init handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAgent {
    pub device_type: String,
    pub locale: String,
    pub os_version: String,
    pub device_name: String,
    pub header_user_agent: String,
    pub device_locale: String,
    pub app_version: String,
    pub screen: String,
    pub timezone: String,
}

impl Default for UserAgent {
    fn default() -> Self {
        Self {
            device_type: "WEB".to_string(),
            locale: "ru".to_string(),
            os_version: "Linux".to_string(),
            device_name: "Firefox".to_string(),
            header_user_agent:
                "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:135.0) Gecko/20100101 Firefox/135.0"
                    .to_string(),
            device_locale: "ru".to_string(),
            app_version: "4.8.42".to_string(),
            screen: "1080x1920 1.0x".to_string(),
            timezone: "Europe/Moscow".to_string(),
        }
    }
}

/// Full client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Optional `Origin` header for the WebSocket handshake.
    pub origin: Option<String>,
    /// Protocol version stamped on every outbound frame.
    pub protocol_version: u8,
    /// Deadline for correlated requests made by the client operations.
    pub request_timeout: Duration,
    /// Device description for session init.
    pub user_agent: UserAgent,
    /// Language for auth requests.
    pub language: String,
    /// Writer task settings.
    pub writer: WriterConfig,
    /// Maximum push handlers running at once.
    pub max_concurrent_handlers: usize,
    /// Opcodes treated as unsolicited push events.
    pub push_opcodes: Vec<u16>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            origin: None,
            protocol_version: PROTOCOL_VERSION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: UserAgent::default(),
            language: DEFAULT_LANGUAGE.to_string(),
            writer: WriterConfig::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            push_opcodes: vec![opcode::NOTIF_MESSAGE],
        }
    }
}

impl ClientConfig {
    /// The subset of settings the multiplexer needs.
    pub fn mux_config(&self) -> MuxConfig {
        MuxConfig {
            protocol_version: self.protocol_version,
            push_opcodes: self.push_opcodes.iter().copied().collect(),
            writer: self.writer.clone(),
        }
    }
}
