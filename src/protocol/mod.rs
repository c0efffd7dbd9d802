//! Protocol module - wire frame, opcodes and sequence numbering.
//!
//! Every exchange on the connection is one JSON object:
//! `{ "ver", "cmd", "seq", "opcode", "payload" }`.
//!
//! - [`Frame`] - the decoded frame with typed accessors
//! - [`opcode`] - reserved and operation opcodes
//! - [`SequenceAllocator`] - caller-side sequence numbers

mod frame;
pub mod opcode;
mod sequence;

pub use frame::{cmd, Frame, PROTOCOL_VERSION};
pub use sequence::SequenceAllocator;
