//! Opcodes used by the client.
//!
//! [`PING`] and [`NOTIF_MESSAGE`] are handled by the frame reader itself;
//! every other opcode is an ordinary request whose reply is matched by
//! sequence number only.

/// Server keepalive. Must be acknowledged in-line.
pub const PING: u16 = 1;

/// Session init carrying the user agent and device id.
pub const SESSION_INIT: u16 = 6;

/// Request a verification code for a phone number.
pub const AUTH_REQUEST: u16 = 17;

/// Submit the verification code.
pub const AUTH: u16 = 18;

/// Log in with a stored token.
pub const LOGIN: u16 = 19;

/// Terminate the session token.
pub const LOGOUT: u16 = 20;

/// Update account settings (chat pinning).
pub const CONFIG: u16 = 22;

/// Look up contacts by id.
pub const CONTACT_INFO: u16 = 32;

/// Look up a contact by phone number.
pub const CONTACT_INFO_BY_PHONE: u16 = 46;

/// Send a chat message.
pub const MSG_SEND: u16 = 64;

/// Delete chat messages.
pub const MSG_DELETE: u16 = 66;

/// Edit a chat message.
pub const MSG_EDIT: u16 = 67;

/// Push: a new message arrived in one of the user's chats.
pub const NOTIF_MESSAGE: u16 = 128;

/// Human-readable name for logging.
pub fn name(opcode: u16) -> &'static str {
    match opcode {
        PING => "PING",
        SESSION_INIT => "SESSION_INIT",
        AUTH_REQUEST => "AUTH_REQUEST",
        AUTH => "AUTH",
        LOGIN => "LOGIN",
        LOGOUT => "LOGOUT",
        CONFIG => "CONFIG",
        CONTACT_INFO => "CONTACT_INFO",
        CONTACT_INFO_BY_PHONE => "CONTACT_INFO_BY_PHONE",
        MSG_SEND => "MSG_SEND",
        MSG_DELETE => "MSG_DELETE",
        MSG_EDIT => "MSG_EDIT",
        NOTIF_MESSAGE => "NOTIF_MESSAGE",
        _ => "UNKNOWN",
    }
}
