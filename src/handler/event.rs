//! Push events handed to handlers.

use serde_json::Value;

use crate::protocol::{opcode, Frame};
use crate::types::Message;

/// Coarse kind of a push event, matched by [`Filter::kind`](crate::Filter::kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// New chat message.
    Message,
    /// Any other push.
    Other,
}

/// An unsolicited server event.
#[derive(Debug, Clone)]
pub enum Event {
    /// A new message arrived.
    Message(Message),
    /// Any other push, undecoded.
    Push {
        /// Frame opcode.
        opcode: u16,
        /// Frame payload.
        payload: Value,
    },
}

impl Event {
    /// Turn a push frame into an event.
    ///
    /// A new-message push whose payload does not map to a [`Message`] is kept
    /// as a raw [`Event::Push`] rather than dropped.
    pub fn from_frame(frame: Frame) -> Self {
        if frame.opcode == opcode::NOTIF_MESSAGE {
            match Message::from_payload(&frame.payload, None) {
                Ok(message) => return Event::Message(message),
                Err(e) => {
                    tracing::warn!(seq = frame.seq, "undecodable message push: {}", e);
                }
            }
        }
        Event::Push {
            opcode: frame.opcode,
            payload: frame.payload,
        }
    }

    /// Kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Message(_) => EventKind::Message,
            Event::Push { .. } => EventKind::Other,
        }
    }

    /// Opcode the event arrived with.
    pub fn opcode(&self) -> u16 {
        match self {
            Event::Message(_) => opcode::NOTIF_MESSAGE,
            Event::Push { opcode, .. } => *opcode,
        }
    }

    /// The message, for message events.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Event::Message(m) => Some(m),
            Event::Push { .. } => None,
        }
    }
}
