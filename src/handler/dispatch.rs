//! Push dispatch off the reader task.
//!
//! The filter scan runs on the reader task, so dispatch decisions keep
//! arrival order. The chosen handler runs in its own task, bounded by a
//! semaphore; when every permit is taken the event is dropped with a
//! warning rather than stalling the reader.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use tokio::sync::{broadcast, Semaphore};

use super::{Event, HandlerRegistry};
use crate::client::{Client, ClientInner};
use crate::mux::ConnectionEvent;
use crate::protocol::Frame;
use crate::reader::PushSink;

pub(crate) struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    client: Weak<ClientInner>,
    semaphore: Arc<Semaphore>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<HandlerRegistry>,
        client: Weak<ClientInner>,
        semaphore: Arc<Semaphore>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            registry,
            client,
            semaphore,
            events,
        }
    }
}

impl PushSink for Dispatcher {
    fn push(&self, frame: Frame) {
        let Some(inner) = self.client.upgrade() else {
            tracing::debug!(opcode = frame.opcode, "client dropped, ignoring push");
            return;
        };
        let client = Client::from_inner(inner);
        let event = Event::from_frame(frame);

        let selection = self.registry.select(client.state(), &event);
        for (handler, error) in selection.faults {
            tracing::warn!(%handler, opcode = event.opcode(), "filter failed: {}", error);
            let _ = self.events.send(ConnectionEvent::FilterFailed {
                handler,
                error: error.to_string(),
            });
        }

        let Some((id, handler)) = selection.matched else {
            tracing::trace!(opcode = event.opcode(), "no handler matched");
            return;
        };

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(
                    handler = %id,
                    opcode = event.opcode(),
                    "handler capacity reached, dropping event"
                );
                return;
            }
        };

        let events = self.events.clone();
        tokio::spawn(async move {
            // Permit is held until this task completes
            let _permit = permit;

            let error = match AssertUnwindSafe(handler.call(client, event))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("handler panicked: {}", panic_message(&*panic)),
            };

            tracing::error!(handler = %id, "handler failed: {}", error);
            let _ = events.send(ConnectionEvent::HandlerFailed { handler: id, error });
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");

        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
