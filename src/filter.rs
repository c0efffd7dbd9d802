//! Filter engine - boolean predicates over (client state, event).
//!
//! A [`Filter`] is a tree of leaf predicates joined by `And`, `Or` and `Not`.
//! Evaluation is pure and deterministic; `And`/`Or` short-circuit left to
//! right.
//!
//! # Example
//!
//! ```
//! use webmax_client::Filter;
//!
//! // "/start" from anyone but ourselves
//! let filter = Filter::command("start").and(Filter::me().negate());
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::handler::{Event, EventKind};
use crate::state::ClientState;

/// Signature of a custom predicate.
pub type PredicateFn = dyn Fn(&ClientState, &Event) -> bool + Send + Sync;

/// A predicate node.
#[derive(Clone, Default)]
pub enum Filter {
    /// Accept every event.
    #[default]
    Any,
    /// Message text equals (case-insensitive). Stored lowercased.
    Text(String),
    /// Message text starts with prefix + command (case-insensitive). Stored lowercased.
    Command(String),
    /// Message sender id equals.
    UserId(i64),
    /// Message chat id equals.
    ChatId(i64),
    /// Message was sent by the authenticated user. Needs identity.
    Me,
    /// Message `type` field equals.
    MessageType(String),
    /// Event kind equals.
    Kind(EventKind),
    /// All children pass.
    And(Vec<Filter>),
    /// Any child passes.
    Or(Vec<Filter>),
    /// Child fails.
    Not(Box<Filter>),
    /// User closure.
    Custom(Arc<PredicateFn>),
}

impl Filter {
    /// Accept every event.
    pub fn accept_all() -> Self {
        Filter::Any
    }

    /// Exact text match, case-insensitive.
    pub fn text(text: impl AsRef<str>) -> Self {
        Filter::Text(text.as_ref().to_lowercase())
    }

    /// Command match with the default `/` prefix.
    pub fn command(command: impl AsRef<str>) -> Self {
        Self::command_with_prefix(command, "/")
    }

    /// Command match with a custom prefix, e.g. `!help`.
    pub fn command_with_prefix(command: impl AsRef<str>, prefix: &str) -> Self {
        Filter::Command(format!("{}{}", prefix, command.as_ref()).to_lowercase())
    }

    /// Messages from the given sender.
    pub fn user_id(id: i64) -> Self {
        Filter::UserId(id)
    }

    /// Messages in the given chat.
    pub fn chat_id(id: i64) -> Self {
        Filter::ChatId(id)
    }

    /// Messages sent by the authenticated user.
    pub fn me() -> Self {
        Filter::Me
    }

    /// Messages of type `USER` (sent by a person rather than the system).
    pub fn user() -> Self {
        Filter::MessageType("USER".to_string())
    }

    /// Messages with the given `type`.
    pub fn message_type(kind: impl Into<String>) -> Self {
        Filter::MessageType(kind.into())
    }

    /// Events of the given kind.
    pub fn kind(kind: EventKind) -> Self {
        Filter::Kind(kind)
    }

    /// All of `filters`. Empty means accept.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    /// Any of `filters`. Empty means reject.
    pub fn any_of(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Custom predicate.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&ClientState, &Event) -> bool + Send + Sync + 'static,
    {
        Filter::Custom(Arc::new(predicate))
    }

    /// `self AND other`, flattening nested ANDs.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut children) => {
                children.push(other);
                Filter::And(children)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// `self OR other`, flattening nested ORs.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut children) => {
                children.push(other);
                Filter::Or(children)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    /// `NOT self`.
    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Evaluate against `event`.
    ///
    /// Leaf predicates on message fields are `false` for non-message events.
    /// [`Filter::Me`] fails with `Unauthenticated` when no identity is
    /// established; that is a usage error, not a non-match.
    pub fn evaluate(&self, state: &ClientState, event: &Event) -> Result<bool> {
        match self {
            Filter::Any => Ok(true),
            Filter::Text(text) => Ok(event
                .message()
                .is_some_and(|m| !m.text.is_empty() && m.text.to_lowercase() == *text)),
            Filter::Command(command) => Ok(event
                .message()
                .is_some_and(|m| m.text.to_lowercase().starts_with(command.as_str()))),
            Filter::UserId(id) => Ok(event.message().is_some_and(|m| m.sender == Some(*id))),
            Filter::ChatId(id) => Ok(event.message().is_some_and(|m| m.chat_id == *id)),
            Filter::Me => {
                let my_id = state.my_id()?;
                Ok(event.message().is_some_and(|m| m.sender == Some(my_id)))
            }
            Filter::MessageType(kind) => Ok(event.message().is_some_and(|m| m.kind == *kind)),
            Filter::Kind(kind) => Ok(event.kind() == *kind),
            Filter::And(children) => {
                for child in children {
                    if !child.evaluate(state, event)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(children) => {
                for child in children {
                    if child.evaluate(state, event)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Not(child) => Ok(!child.evaluate(state, event)?),
            Filter::Custom(predicate) => Ok(predicate(state, event)),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Any => write!(f, "Any"),
            Filter::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Filter::Command(c) => f.debug_tuple("Command").field(c).finish(),
            Filter::UserId(id) => f.debug_tuple("UserId").field(id).finish(),
            Filter::ChatId(id) => f.debug_tuple("ChatId").field(id).finish(),
            Filter::Me => write!(f, "Me"),
            Filter::MessageType(k) => f.debug_tuple("MessageType").field(k).finish(),
            Filter::Kind(k) => f.debug_tuple("Kind").field(k).finish(),
            Filter::And(c) => f.debug_tuple("And").field(c).finish(),
            Filter::Or(c) => f.debug_tuple("Or").field(c).finish(),
            Filter::Not(c) => f.debug_tuple("Not").field(c).finish(),
            Filter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WebMaxError;
    use crate::types::{Message, User};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(sender: i64, text: &str) -> Event {
        Event::Message(Message {
            chat_id: 10,
            id: "1".to_string(),
            sender: Some(sender),
            time: 0,
            text: text.to_string(),
            kind: "USER".to_string(),
            update_time: None,
            options: None,
            cid: None,
            attaches: Vec::new(),
            link: None,
        })
    }

    fn logged_in(id: i64) -> ClientState {
        ClientState::authenticated(User::from_profile(json!({ "id": id })).unwrap())
    }

    fn counting(result: bool, counter: &Arc<AtomicUsize>) -> Filter {
        let counter = counter.clone();
        Filter::custom(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            result
        })
    }

    #[test]
    fn test_text_is_case_insensitive() {
        let state = ClientState::new();
        let filter = Filter::text("Hello");

        assert!(filter.evaluate(&state, &message(1, "hello")).unwrap());
        assert!(filter.evaluate(&state, &message(1, "HELLO")).unwrap());
        assert!(!filter.evaluate(&state, &message(1, "hello there")).unwrap());
        assert!(!filter.evaluate(&state, &message(1, "")).unwrap());
    }

    #[test]
    fn test_command_prefix() {
        let state = ClientState::new();

        let start = Filter::command("start");
        assert!(start.evaluate(&state, &message(1, "/Start now")).unwrap());
        assert!(!start.evaluate(&state, &message(1, "start")).unwrap());

        let help = Filter::command_with_prefix("help", "!");
        assert!(help.evaluate(&state, &message(1, "!help")).unwrap());
        assert!(!help.evaluate(&state, &message(1, "/help")).unwrap());
    }

    #[test]
    fn test_sender_and_chat() {
        let state = ClientState::new();
        let event = message(42, "x");

        assert!(Filter::user_id(42).evaluate(&state, &event).unwrap());
        assert!(!Filter::user_id(7).evaluate(&state, &event).unwrap());
        assert!(Filter::chat_id(10).evaluate(&state, &event).unwrap());
        assert!(Filter::user().evaluate(&state, &event).unwrap());
        assert!(!Filter::message_type("CHANNEL").evaluate(&state, &event).unwrap());
    }

    #[test]
    fn test_me_requires_identity() {
        let err = Filter::me()
            .evaluate(&ClientState::new(), &message(1, "x"))
            .unwrap_err();
        assert!(matches!(err, WebMaxError::Unauthenticated));

        let state = logged_in(1);
        assert!(Filter::me().evaluate(&state, &message(1, "x")).unwrap());
        assert!(!Filter::me().evaluate(&state, &message(2, "x")).unwrap());
        assert!(Filter::me().negate().evaluate(&state, &message(2, "x")).unwrap());
    }

    #[test]
    fn test_leaves_reject_non_message_events() {
        let state = logged_in(1);
        let push = Event::Push {
            opcode: 130,
            payload: json!({}),
        };

        assert!(!Filter::text("x").evaluate(&state, &push).unwrap());
        assert!(!Filter::me().evaluate(&state, &push).unwrap());
        assert!(Filter::kind(EventKind::Other).evaluate(&state, &push).unwrap());
        assert!(Filter::accept_all().evaluate(&state, &push).unwrap());
    }

    #[test]
    fn test_and_or_not_truth_tables() {
        let state = ClientState::new();
        let event = message(1, "x");
        let t = || Filter::Any;
        let f = || Filter::Any.negate();

        for (a, b) in [(true, true), (true, false), (false, true), (false, false)] {
            let pick = |v: bool| if v { t() } else { f() };
            assert_eq!(
                pick(a).and(pick(b)).evaluate(&state, &event).unwrap(),
                a && b
            );
            assert_eq!(pick(a).or(pick(b)).evaluate(&state, &event).unwrap(), a || b);
            assert_eq!(pick(a).negate().evaluate(&state, &event).unwrap(), !a);
        }
    }

    #[test]
    fn test_and_short_circuits() {
        let state = ClientState::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let filter = counting(false, &a).and(counting(true, &b));
        assert!(!filter.evaluate(&state, &message(1, "x")).unwrap());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_or_short_circuits() {
        let state = ClientState::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let filter = counting(true, &a).or(counting(false, &b));
        assert!(filter.evaluate(&state, &message(1, "x")).unwrap());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_short_circuit_skips_unauthenticated_branch() {
        let state = ClientState::new();
        let filter = Filter::text("nope").and(Filter::me());
        assert!(!filter.evaluate(&state, &message(1, "x")).unwrap());
    }

    #[test]
    fn test_combinators_flatten() {
        let filter = Filter::Any.and(Filter::Me).and(Filter::text("x"));
        match filter {
            Filter::And(children) => assert_eq!(children.len(), 3),
            other => panic!("unexpected {:?}", other),
        }

        assert!(Filter::all([]).evaluate(&ClientState::new(), &message(1, "x")).unwrap());
        assert!(!Filter::any_of([]).evaluate(&ClientState::new(), &message(1, "x")).unwrap());
    }
}
