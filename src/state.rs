//! Per-client state visible to filters and handlers.

use parking_lot::RwLock;

use crate::error::{Result, WebMaxError};
use crate::types::User;

/// Authenticated identity of one client.
///
/// Owned by a single [`Client`](crate::Client); nothing here is global.
#[derive(Debug, Default)]
pub struct ClientState {
    me: RwLock<Option<User>>,
}

impl ClientState {
    /// Create state with no identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create state already authenticated as `user`.
    pub fn authenticated(user: User) -> Self {
        Self {
            me: RwLock::new(Some(user)),
        }
    }

    /// The logged-in user, if any.
    pub fn me(&self) -> Option<User> {
        self.me.read().clone()
    }

    /// Id of the logged-in user, or `Unauthenticated`.
    pub fn my_id(&self) -> Result<i64> {
        self.me
            .read()
            .as_ref()
            .map(User::id)
            .ok_or(WebMaxError::Unauthenticated)
    }

    /// True once a profile has been stored.
    pub fn is_authenticated(&self) -> bool {
        self.me.read().is_some()
    }

    pub(crate) fn set_me(&self, user: User) {
        *self.me.write() = Some(user);
    }

    pub(crate) fn clear(&self) {
        *self.me.write() = None;
    }
}
