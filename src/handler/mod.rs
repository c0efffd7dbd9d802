//! Handler module - push events and their dispatch.
//!
//! Provides:
//! - [`Event`] - a decoded push (new message or raw opcode + payload)
//! - [`HandlerRegistry`] - ordered `(Filter, Handler)` bindings, first match wins
//! - the dispatcher that connects the frame reader to the registry
//!
//! # Example
//!
//! ```ignore
//! use webmax_client::{Client, Filter};
//!
//! let client = Client::builder()
//!     .token("...")
//!     .on_message(Filter::command("start"), |client, message| async move {
//!         message.answer(&client, "hello").await?;
//!         Ok(())
//!     })
//!     .on(Filter::accept_all(), |_client, event| async move {
//!         tracing::info!(opcode = event.opcode(), "unhandled push");
//!         Ok(())
//!     })
//!     .build();
//! ```

mod dispatch;
mod event;
mod registry;

pub(crate) use dispatch::Dispatcher;
pub use event::{Event, EventKind};
pub use registry::{
    BoxFuture, EventHandler, Handler, HandlerId, HandlerRegistry, HandlerResult, MessageHandler,
    Selection,
};
