//! Handler registry with first-match dispatch.
//!
//! Bindings are `(Filter, Handler)` pairs kept in registration order. For
//! each event the registry scans the bindings in order and picks the first
//! whose filter passes; later bindings never see that event. An event with
//! no match is dropped silently.
//!
//! # Example
//!
//! ```ignore
//! use webmax_client::{Filter, HandlerRegistry};
//!
//! let registry = HandlerRegistry::new();
//!
//! registry.register_message(Filter::command("ping"), |client, message| async move {
//!     message.reply(&client, "pong").await?;
//!     Ok(())
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Event, EventKind};
use crate::client::Client;
use crate::error::{Result, WebMaxError};
use crate::filter::Filter;
use crate::state::ClientState;
use crate::types::Message;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for push handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle one event.
    fn call(&self, client: Client, event: Event) -> BoxFuture<'static, HandlerResult>;
}

/// Handler receiving the raw [`Event`].
pub struct EventHandler<F, Fut>
where
    F: Fn(Client, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> EventHandler<F, Fut>
where
    F: Fn(Client, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for EventHandler<F, Fut>
where
    F: Fn(Client, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, client: Client, event: Event) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(client, event))
    }
}

/// Handler that only accepts message events and receives the [`Message`].
pub struct MessageHandler<F, Fut>
where
    F: Fn(Client, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> MessageHandler<F, Fut>
where
    F: Fn(Client, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for MessageHandler<F, Fut>
where
    F: Fn(Client, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, client: Client, event: Event) -> BoxFuture<'static, HandlerResult> {
        match event {
            Event::Message(message) => Box::pin((self.handler)(client, message)),
            Event::Push { opcode, .. } => Box::pin(async move {
                Err(WebMaxError::Protocol(format!(
                    "message handler got push with opcode {}",
                    opcode
                )))
            }),
        }
    }
}

/// Identifies one registered binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub usize);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// Entry for a registered handler.
#[derive(Clone)]
struct Binding {
    id: HandlerId,
    filter: Filter,
    handler: Arc<dyn Handler>,
}

/// Outcome of scanning the bindings for one event.
pub struct Selection {
    /// First binding whose filter passed.
    pub matched: Option<(HandlerId, Arc<dyn Handler>)>,
    /// Bindings whose filter failed to evaluate, in scan order.
    pub faults: Vec<(HandlerId, WebMaxError)>,
}

/// Ordered list of `(Filter, Handler)` bindings.
///
/// Registration swaps in a new list; selection scans a snapshot with no lock
/// held, so filters and handlers may register more bindings.
pub struct HandlerRegistry {
    bindings: RwLock<Arc<Vec<Binding>>>,
    next_id: AtomicUsize,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Append a binding. Order of registration is dispatch priority.
    pub fn register_handler(&self, filter: Filter, handler: Arc<dyn Handler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, ?filter, "registered handler");
        let mut bindings = self.bindings.write();
        Arc::make_mut(&mut *bindings).push(Binding {
            id,
            filter,
            handler,
        });
        id
    }

    /// Register a closure receiving every matching event.
    pub fn register<F, Fut>(&self, filter: Filter, handler: F) -> HandlerId
    where
        F: Fn(Client, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(filter, Arc::new(EventHandler::new(handler)))
    }

    /// Register a closure receiving matching messages.
    ///
    /// The filter is narrowed to message events.
    pub fn register_message<F, Fut>(&self, filter: Filter, handler: F) -> HandlerId
    where
        F: Fn(Client, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let filter = Filter::kind(EventKind::Message).and(filter);
        self.register_handler(filter, Arc::new(MessageHandler::new(handler)))
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Ids in dispatch order.
    pub fn ids(&self) -> Vec<HandlerId> {
        self.bindings.read().iter().map(|b| b.id).collect()
    }

    /// Pick the handler for `event`.
    ///
    /// A filter that errors counts as a non-match for its own binding and is
    /// reported in [`Selection::faults`]; the scan continues.
    pub fn select(&self, state: &ClientState, event: &Event) -> Selection {
        let bindings = Arc::clone(&self.bindings.read());
        let mut faults = Vec::new();

        for binding in bindings.iter() {
            match binding.filter.evaluate(state, event) {
                Ok(true) => {
                    return Selection {
                        matched: Some((binding.id, Arc::clone(&binding.handler))),
                        faults,
                    };
                }
                Ok(false) => {}
                Err(e) => faults.push((binding.id, e)),
            }
        }

        Selection {
            matched: None,
            faults,
        }
    }

    /// Select and run the handler for `event` on the current task.
    ///
    /// Returns the id of the handler that ran, or `None` if nothing matched.
    pub async fn dispatch(&self, client: Client, event: Event) -> Result<Option<HandlerId>> {
        let selection = self.select(client.state(), &event);
        for (id, error) in &selection.faults {
            tracing::warn!(%id, "filter failed: {}", error);
        }

        match selection.matched {
            Some((id, handler)) => {
                handler.call(client, event).await?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn text_event(text: &str) -> Event {
        Event::Message(
            Message::from_payload(
                &json!({"chatId": 1, "message": {"id": "1", "sender": 5, "text": text}}),
                None,
            )
            .unwrap(),
        )
    }

    fn counter_handler(
        registry: &HandlerRegistry,
        filter: Filter,
        counter: &Arc<AtomicUsize>,
    ) -> HandlerId {
        let counter = counter.clone();
        registry.register(filter, move |_client, _event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let registry = HandlerRegistry::new();
        let a = registry.register(Filter::Any, |_, _| async { Ok(()) });
        let b = registry.register(Filter::Any, |_, _| async { Ok(()) });

        assert_eq!(a, HandlerId(1));
        assert_eq!(b, HandlerId(2));
        assert_eq!(registry.ids(), vec![a, b]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_first_match_only() {
        let registry = HandlerRegistry::new();
        let h1 = Arc::new(AtomicUsize::new(0));
        let h2 = Arc::new(AtomicUsize::new(0));
        let first = counter_handler(&registry, Filter::Any, &h1);
        counter_handler(&registry, Filter::Any, &h2);

        let client = Client::builder().build();
        let ran = registry.dispatch(client, text_event("hi")).await.unwrap();

        assert_eq!(ran, Some(first));
        assert_eq!(h1.load(Ordering::SeqCst), 1);
        assert_eq!(h2.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_later_binding_matches_when_earlier_rejects() {
        let registry = HandlerRegistry::new();
        let h1 = Arc::new(AtomicUsize::new(0));
        let h2 = Arc::new(AtomicUsize::new(0));
        counter_handler(&registry, Filter::text("other"), &h1);
        let second = counter_handler(&registry, Filter::text("hi"), &h2);

        let ran = registry
            .dispatch(Client::builder().build(), text_event("hi"))
            .await
            .unwrap();

        assert_eq!(ran, Some(second));
        assert_eq!(h1.load(Ordering::SeqCst), 0);
        assert_eq!(h2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_match_is_not_an_error() {
        let registry = HandlerRegistry::new();
        registry.register(Filter::text("nope"), |_, _| async { Ok(()) });

        let ran = registry
            .dispatch(Client::builder().build(), text_event("hi"))
            .await
            .unwrap();
        assert_eq!(ran, None);
    }

    #[test]
    fn test_filter_fault_does_not_stop_scan() {
        let registry = HandlerRegistry::new();
        let faulty = registry.register(Filter::me(), |_, _| async { Ok(()) });
        let fallback = registry.register(Filter::Any, |_, _| async { Ok(()) });

        let selection = registry.select(&ClientState::new(), &text_event("hi"));

        assert_eq!(selection.matched.map(|(id, _)| id), Some(fallback));
        assert_eq!(selection.faults.len(), 1);
        assert_eq!(selection.faults[0].0, faulty);
        assert!(matches!(selection.faults[0].1, WebMaxError::Unauthenticated));
    }

    #[test]
    fn test_filter_may_register_during_select() {
        let registry = Arc::new(HandlerRegistry::new());
        let weak = Arc::downgrade(&registry);
        registry.register(
            Filter::custom(move |_, _| {
                if let Some(registry) = weak.upgrade() {
                    registry.register(Filter::Any, |_, _| async { Ok(()) });
                }
                false
            }),
            |_, _| async { Ok(()) },
        );

        // The scan sees the list as it was when it started.
        let first = registry.select(&ClientState::new(), &text_event("hi"));
        assert!(first.matched.is_none());
        assert_eq!(registry.len(), 2);

        let second = registry.select(&ClientState::new(), &text_event("hi"));
        assert_eq!(second.matched.map(|(id, _)| id), Some(HandlerId(2)));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_message_handler_ignores_other_pushes() {
        let registry = HandlerRegistry::new();
        registry.register_message(Filter::Any, |_, _| async { Ok(()) });

        let push = Event::Push {
            opcode: 130,
            payload: json!({}),
        };
        assert!(registry
            .select(&ClientState::new(), &push)
            .matched
            .is_none());
        assert!(registry
            .select(&ClientState::new(), &text_event("x"))
            .matched
            .is_some());
    }

    #[tokio::test]
    async fn test_handler_error_propagates_from_dispatch() {
        let registry = HandlerRegistry::new();
        registry.register(Filter::Any, |_, _| async {
            Err(WebMaxError::Protocol("boom".into()))
        });

        let result = registry
            .dispatch(Client::builder().build(), text_event("x"))
            .await;
        assert!(matches!(result, Err(WebMaxError::Protocol(_))));
    }
}
