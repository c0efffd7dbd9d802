//! # webmax-client
//!
//! Async Rust client for the WebMax real-time messaging protocol.
//!
//! Everything travels as JSON frames over one WebSocket:
//! `{ ver, cmd, seq, opcode, payload }`. Requests are correlated with their
//! replies by sequence number; the server also pushes unsolicited frames
//! (new messages, keepalive pings) on the same stream.
//!
//! ## Architecture
//!
//! - **Multiplexer** ([`mux`]): one reader task owns the inbound stream and
//!   routes every frame: replies to the [`pending`] table, pings to an
//!   automatic ack, pushes to the handler dispatcher
//! - **Writer** ([`writer`]): one task owns the outbound stream; callers
//!   enqueue frames through a cloneable handle
//! - **Handlers** ([`handler`], [`filter`]): ordered `(Filter, Handler)`
//!   bindings, the first matching binding handles each push
//! - **Client** ([`Client`]): session init, login, and the messaging
//!   operations built on top
//!
//! ## Example
//!
//! ```ignore
//! use webmax_client::{Client, Filter};
//!
//! #[tokio::main]
//! async fn main() -> webmax_client::Result<()> {
//!     let client = Client::builder()
//!         .token("...")
//!         .on_message(Filter::text("ping"), |client, message| async move {
//!             message.reply(&client, "pong").await?;
//!             Ok(())
//!         })
//!         .start()
//!         .await?;
//!
//!     client.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod handler;
pub mod mux;
pub mod pending;
pub mod protocol;
pub mod reader;
pub mod state;
pub mod transport;
pub mod types;
pub mod writer;

mod client;

pub use client::{Client, ClientBuilder, SendOptions, UserLookup};
pub use config::{ClientConfig, UserAgent};
pub use error::{CloseReason, Result, WebMaxError};
pub use filter::Filter;
pub use handler::{Event, EventKind, HandlerId, HandlerRegistry};
pub use mux::{ConnectionEvent, Multiplexer, MuxConfig};
pub use state::ClientState;
pub use types::{Contact, Message, Name, User};
