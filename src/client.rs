//! Client builder and session lifecycle.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the
//! connection and registering push handlers. The [`Client`] manages the
//! session:
//! 1. Open the WebSocket and start the multiplexer
//! 2. Send session init (device description)
//! 3. Log in with the auth token and store the profile
//! 4. Dispatch pushes to handlers until stopped
//!
//! # Example
//!
//! ```ignore
//! use webmax_client::{Client, Filter};
//!
//! #[tokio::main]
//! async fn main() -> webmax_client::Result<()> {
//!     let client = Client::builder()
//!         .token(std::env::var("WEBMAX_TOKEN").unwrap_or_default())
//!         .on_message(Filter::command("ping"), |client, message| async move {
//!             message.reply(&client, "pong").await?;
//!             Ok(())
//!         })
//!         .build();
//!
//!     client.run().await?;
//!     client.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, Semaphore};

use crate::config::{ClientConfig, UserAgent};
use crate::error::{CloseReason, Result, WebMaxError};
use crate::filter::Filter;
use crate::handler::{BoxFuture, Dispatcher, Event, HandlerId, HandlerRegistry, HandlerResult};
use crate::mux::{ConnectionEvent, Multiplexer, EVENT_CHANNEL_CAPACITY};
use crate::protocol::opcode;
use crate::state::ClientState;
use crate::transport::{self, BoxedSink, BoxedSource, FrameSink, FrameSource};
use crate::types::{Message, User};

type ConnectHook = Arc<dyn Fn(Client) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Builder for configuring and creating a client.
pub struct ClientBuilder {
    config: ClientConfig,
    token: Option<String>,
    phone: Option<String>,
    registry: HandlerRegistry,
    on_connect: Option<ConnectHook>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            token: None,
            phone: None,
            registry: HandlerRegistry::new(),
            on_connect: None,
        }
    }

    /// Auth token used by [`Client::connect`].
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Phone number, kept for the auth flow.
    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// WebSocket endpoint.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// `Origin` header for the handshake.
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.config.origin = Some(origin.into());
        self
    }

    /// Deadline for correlated requests.
    ///
    /// Default: 15 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Language sent with auth requests.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    /// Device description sent on session init.
    pub fn user_agent(mut self, user_agent: UserAgent) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    /// Set the maximum number of concurrently running handlers.
    ///
    /// When this limit is reached, new events are dropped with a warning.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Treat another opcode as an uncorrelated push.
    pub fn push_opcode(mut self, opcode: u16) -> Self {
        if !self.config.push_opcodes.contains(&opcode) {
            self.config.push_opcodes.push(opcode);
        }
        self
    }

    /// Register a push handler. Earlier registrations take priority.
    pub fn on<F, Fut>(self, filter: Filter, handler: F) -> Self
    where
        F: Fn(Client, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(filter, handler);
        self
    }

    /// Register a new-message handler.
    pub fn on_message<F, Fut>(self, filter: Filter, handler: F) -> Self
    where
        F: Fn(Client, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_message(filter, handler);
        self
    }

    /// Run `hook` after every successful login.
    pub fn on_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Client) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(
            move |client: Client| -> BoxFuture<'static, HandlerResult> { Box::pin(hook(client)) },
        ));
        self
    }

    /// Build the client. No connection is made yet.
    pub fn build(self) -> Client {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_handlers));

        Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                token: RwLock::new(self.token),
                phone: self.phone,
                state: ClientState::new(),
                registry: Arc::new(self.registry),
                semaphore,
                events,
                session: RwLock::new(None),
                logged_in: AtomicBool::new(false),
                connect_lock: tokio::sync::Mutex::new(()),
                on_connect: self.on_connect,
            }),
        }
    }

    /// Build the client and connect.
    pub async fn start(self) -> Result<Client> {
        let client = self.build();
        client.run().await?;
        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    token: RwLock<Option<String>>,
    phone: Option<String>,
    state: ClientState,
    registry: Arc<HandlerRegistry>,
    semaphore: Arc<Semaphore>,
    events: broadcast::Sender<ConnectionEvent>,
    /// Multiplexer of the current connection.
    session: RwLock<Option<Arc<Multiplexer>>>,
    logged_in: AtomicBool,
    /// Serializes connect / open so only one transport is ever opened.
    connect_lock: tokio::sync::Mutex<()>,
    on_connect: Option<ConnectHook>,
}

/// Options for [`Client::send_message_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    /// Id of the message being replied to.
    pub reply_to: Option<String>,
    /// Notify chat participants.
    pub notify: bool,
}

impl SendOptions {
    /// Reply to `message_id`.
    pub fn reply_to(message_id: impl Into<String>) -> Self {
        Self {
            reply_to: Some(message_id.into()),
            ..Self::default()
        }
    }

    /// Set whether participants are notified.
    pub fn notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            reply_to: None,
            notify: true,
        }
    }
}

/// How [`Client::get_user`] finds a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    /// By contact id.
    Id(i64),
    /// By phone number.
    Phone(String),
    /// The other participant of a private chat.
    ChatId(i64),
}

/// A client handle. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.config.url)
            .field("connected", &self.is_connected())
            .field("me", &self.inner.state.me().map(|u| u.id()))
            .finish()
    }
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    /// Identity state seen by filters.
    pub fn state(&self) -> &ClientState {
        &self.inner.state
    }

    /// The logged-in user.
    pub fn me(&self) -> Option<User> {
        self.inner.state.me()
    }

    /// Effective configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current auth token.
    pub fn token(&self) -> Option<String> {
        self.inner.token.read().clone()
    }

    /// Replace the auth token used by the next login.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.inner.token.write() = Some(token.into());
    }

    /// Phone number given to the builder.
    pub fn phone(&self) -> Option<&str> {
        self.inner.phone.as_deref()
    }

    /// Register a push handler after build.
    pub fn on<F, Fut>(&self, filter: Filter, handler: F) -> HandlerId
    where
        F: Fn(Client, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.registry.register(filter, handler)
    }

    /// Register a new-message handler after build.
    pub fn on_message<F, Fut>(&self, filter: Filter, handler: F) -> HandlerId
    where
        F: Fn(Client, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.registry.register_message(filter, handler)
    }

    /// The handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Subscribe to connection events. The subscription survives reconnects.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// True while logged in over a live connection.
    pub fn is_connected(&self) -> bool {
        self.inner.logged_in.load(Ordering::Acquire) && self.running_session().is_some()
    }

    /// Requests waiting for a reply on the current connection.
    pub fn pending_requests(&self) -> usize {
        self.running_session().map_or(0, |mux| mux.pending_count())
    }

    fn running_session(&self) -> Option<Arc<Multiplexer>> {
        self.inner
            .session
            .read()
            .as_ref()
            .filter(|mux| mux.is_running())
            .cloned()
    }

    fn session(&self) -> Result<Arc<Multiplexer>> {
        self.running_session().ok_or(WebMaxError::ConnectionClosed)
    }

    // ----- lifecycle -------------------------------------------------------

    /// Connect to the configured endpoint and log in. No-op when connected.
    pub async fn connect(&self) -> Result<()> {
        if self.establish(None, true).await? {
            self.run_connect_hook().await;
        }
        Ok(())
    }

    /// Like [`connect`](Self::connect) over a caller-supplied transport.
    ///
    /// The transport is dropped unused if a session is already running.
    pub async fn connect_with<S, R>(&self, sink: S, source: R) -> Result<()>
    where
        S: FrameSink + 'static,
        R: FrameSource + 'static,
    {
        if self
            .establish(Some((Box::new(sink), Box::new(source))), true)
            .await?
        {
            self.run_connect_hook().await;
        }
        Ok(())
    }

    /// Open a session without logging in (for the auth flow).
    pub async fn open_session(&self) -> Result<()> {
        self.establish(None, false).await.map(|_| ())
    }

    /// Like [`open_session`](Self::open_session) over a caller-supplied transport.
    pub async fn open_session_with<S, R>(&self, sink: S, source: R) -> Result<()>
    where
        S: FrameSink + 'static,
        R: FrameSource + 'static,
    {
        self.establish(Some((Box::new(sink), Box::new(source))), false)
            .await
            .map(|_| ())
    }

    /// Connect and start dispatching pushes in the background.
    pub async fn run(&self) -> Result<()> {
        self.connect().await
    }

    /// Wait until the current connection closes and return why.
    pub async fn wait_for_shutdown(&self) -> CloseReason {
        let session = self.inner.session.read().clone();
        match session {
            Some(mux) => {
                mux.closed().await;
                mux.close_reason().unwrap_or(CloseReason::Stopped)
            }
            None => CloseReason::Stopped,
        }
    }

    /// Stop the connection. Pending requests fail with `ConnectionClosed`.
    pub async fn stop(&self) {
        let session = self.inner.session.write().take();
        self.inner.logged_in.store(false, Ordering::Release);
        self.inner.state.clear();

        if let Some(mux) = session {
            mux.stop().await;
        }
    }

    /// Alias for [`stop`](Self::stop).
    pub async fn disconnect(&self) {
        self.stop().await
    }

    /// Returns `true` if this call logged in.
    async fn establish(
        &self,
        transport: Option<(BoxedSink, BoxedSource)>,
        login: bool,
    ) -> Result<bool> {
        let _guard = self.inner.connect_lock.lock().await;

        if login && self.is_connected() {
            return Ok(false);
        }
        let token = self.token();
        if login && token.is_none() {
            return Err(WebMaxError::MissingToken);
        }

        let mux = match self.running_session() {
            Some(mux) => {
                if transport.is_some() {
                    tracing::debug!("session already open, dropping supplied transport");
                }
                mux
            }
            None => {
                let (sink, source) = match transport {
                    Some(pair) => pair,
                    None => self.open_transport().await?,
                };
                self.open(sink, source).await?
            }
        };

        let Some(token) = token.filter(|_| login) else {
            return Ok(false);
        };
        match self.login(&mux, &token).await {
            Ok(user) => {
                tracing::info!(user_id = user.id(), "logged in");
                self.inner.state.set_me(user);
                self.inner.logged_in.store(true, Ordering::Release);
                Ok(true)
            }
            Err(e) => {
                tracing::error!("login failed: {}", e);
                self.inner.session.write().take();
                mux.stop().await;
                Err(e)
            }
        }
    }

    async fn open_transport(&self) -> Result<(BoxedSink, BoxedSource)> {
        let config = &self.inner.config;
        let (sink, source) = transport::connect(&config.url, config.origin.as_deref()).await?;
        Ok((Box::new(sink), Box::new(source)))
    }

    async fn open(&self, sink: BoxedSink, source: BoxedSource) -> Result<Arc<Multiplexer>> {
        let dispatcher = Dispatcher::new(
            self.inner.registry.clone(),
            Arc::downgrade(&self.inner),
            self.inner.semaphore.clone(),
            self.inner.events.clone(),
        );
        let mux = Arc::new(Multiplexer::new(
            sink,
            source,
            Arc::new(dispatcher),
            self.inner.config.mux_config(),
            self.inner.events.clone(),
        ));
        mux.start();

        self.inner.logged_in.store(false, Ordering::Release);
        *self.inner.session.write() = Some(mux.clone());

        if let Err(e) = self.session_init(&mux).await {
            tracing::error!("session init failed: {}", e);
            self.inner.session.write().take();
            mux.stop().await;
            return Err(e);
        }
        Ok(mux)
    }

    async fn session_init(&self, mux: &Multiplexer) -> Result<()> {
        let user_agent = serde_json::to_value(&self.inner.config.user_agent)?;
        let payload = json!({
            "userAgent": user_agent,
            "deviceId": uuid::Uuid::new_v4().to_string(),
        });
        self.call(mux, opcode::SESSION_INIT, payload).await?;
        tracing::debug!("session initialized");
        Ok(())
    }

    async fn login(&self, mux: &Multiplexer, token: &str) -> Result<User> {
        let payload = json!({
            "interactive": true,
            "token": token,
            "chatsSync": 0,
            "contactsSync": 0,
            "presenceSync": 0,
            "draftsSync": 0,
            "chatsCount": 0,
        });
        let mut reply = self.call(mux, opcode::LOGIN, payload).await?;
        let profile = take_field(&mut reply, "profile")?;
        User::from_profile(profile)
    }

    async fn run_connect_hook(&self) {
        if let Some(hook) = &self.inner.on_connect {
            if let Err(e) = hook(self.clone()).await {
                tracing::error!("on_connect hook failed: {}", e);
            }
        }
    }

    // ----- raw passthrough ------------------------------------------------

    /// Send a correlated request with the configured timeout.
    ///
    /// A reply carrying an `error` field becomes [`WebMaxError::Server`].
    pub async fn request(&self, opcode: u16, payload: Value) -> Result<Value> {
        self.call(&*self.session()?, opcode, payload).await
    }

    /// Send a correlated request with an explicit timeout (`None` waits forever).
    pub async fn request_with_timeout(
        &self,
        opcode: u16,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let reply = self
            .session()?
            .send_and_await(opcode, payload, timeout)
            .await?;
        check_server_error(reply)
    }

    /// Send a frame without waiting for a reply. Returns its sequence number.
    pub async fn notify(&self, opcode: u16, payload: Value) -> Result<u64> {
        self.session()?.send_fire_and_forget(opcode, payload).await
    }

    async fn call(&self, mux: &Multiplexer, opcode: u16, payload: Value) -> Result<Value> {
        let reply = mux
            .send_and_await(opcode, payload, Some(self.inner.config.request_timeout))
            .await?;
        check_server_error(reply)
    }

    // ----- auth -------------------------------------------------------------

    /// Ask the server to send a verification code to `phone`.
    ///
    /// Opens a session if none is running. Returns the verification token
    /// to pass to [`check_code`](Self::check_code).
    pub async fn start_auth(&self, phone: &str) -> Result<String> {
        if self.inner.logged_in.load(Ordering::Acquire) {
            return Err(WebMaxError::InvalidArgument(
                "client is already logged in".to_string(),
            ));
        }
        self.open_session().await?;

        let payload = json!({
            "phone": phone,
            "type": "START_AUTH",
            "language": self.inner.config.language,
        });
        let mut reply = self.request(opcode::AUTH_REQUEST, payload).await?;
        match take_field(&mut reply, "token")? {
            Value::String(token) => Ok(token),
            other => Err(WebMaxError::Protocol(format!(
                "verification token is not a string: {}",
                other
            ))),
        }
    }

    /// Submit the verification code.
    ///
    /// On success the login token is stored and the profile becomes
    /// [`me`](Self::me). A wrong code fails with a server error for which
    /// [`WebMaxError::is_wrong_code`] is true.
    pub async fn check_code(&self, verify_token: &str, code: &str) -> Result<User> {
        let payload = json!({
            "token": verify_token,
            "verifyCode": code,
            "authTokenType": "CHECK_CODE",
        });
        let mut reply = self.request(opcode::AUTH, payload).await?;

        let login_token = reply
            .pointer("/tokenAttrs/LOGIN/token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| WebMaxError::Protocol("reply has no login token".to_string()))?;
        let user = User::from_profile(take_field(&mut reply, "profile")?)?;

        self.set_token(login_token);
        self.inner.state.set_me(user.clone());
        tracing::info!(user_id = user.id(), "verification code accepted");
        Ok(user)
    }

    /// Invalidate the login token on the server and disconnect.
    pub async fn session_exit(&self) -> Result<()> {
        self.notify(opcode::LOGOUT, json!({})).await?;
        *self.inner.token.write() = None;
        self.stop().await;
        Ok(())
    }

    // ----- messages ---------------------------------------------------------

    /// Send a text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message> {
        self.send_message_with(chat_id, text, SendOptions::default())
            .await
    }

    /// Send a text message with options.
    pub async fn send_message_with(
        &self,
        chat_id: i64,
        text: &str,
        options: SendOptions,
    ) -> Result<Message> {
        let mut message = json!({
            "text": text,
            "cid": chrono::Utc::now().timestamp_millis(),
            "elements": [],
            "attaches": [],
        });
        if let Some(reply_to) = options.reply_to {
            message["link"] = json!({ "type": "REPLY", "messageId": reply_to });
        }
        let payload = json!({
            "chatId": chat_id,
            "message": message,
            "notify": options.notify,
        });

        let reply = self.request(opcode::MSG_SEND, payload).await?;
        Message::from_payload(&reply, Some(chat_id))
    }

    /// Replace the text of a message.
    pub async fn edit_message(
        &self,
        chat_id: i64,
        message_id: impl fmt::Display,
        text: &str,
    ) -> Result<Message> {
        let payload = json!({
            "chatId": chat_id,
            "messageId": message_id.to_string(),
            "text": text,
            "elements": [],
            "attachments": [],
        });
        let reply = self.request(opcode::MSG_EDIT, payload).await?;
        Message::from_payload(&reply, Some(chat_id))
    }

    /// Delete messages. Fire and forget.
    pub async fn delete_message<I>(&self, chat_id: i64, message_ids: I, for_me: bool) -> Result<()>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        let ids: Vec<String> = message_ids.into_iter().map(|id| id.to_string()).collect();
        if ids.is_empty() {
            return Err(WebMaxError::InvalidArgument(
                "no message ids to delete".to_string(),
            ));
        }
        let payload = json!({
            "chatId": chat_id,
            "messageIds": ids,
            "forMe": for_me,
        });
        self.notify(opcode::MSG_DELETE, payload).await?;
        Ok(())
    }

    /// Pin a chat to the top of the list. Fire and forget.
    pub async fn pin_chat(&self, chat_id: i64) -> Result<()> {
        self.set_fav_index(chat_id, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// Unpin a chat. Fire and forget.
    pub async fn unpin_chat(&self, chat_id: i64) -> Result<()> {
        self.set_fav_index(chat_id, 0).await
    }

    async fn set_fav_index(&self, chat_id: i64, fav_index: i64) -> Result<()> {
        let mut chats = Map::new();
        chats.insert(chat_id.to_string(), json!({ "favIndex": fav_index }));
        let payload = json!({ "settings": { "chats": chats } });
        self.notify(opcode::CONFIG, payload).await?;
        Ok(())
    }

    // ----- contacts ---------------------------------------------------------

    /// Look up a user profile.
    pub async fn get_user(&self, lookup: UserLookup) -> Result<User> {
        match lookup {
            UserLookup::Id(id) => self.get_user_by_id(id).await,
            UserLookup::ChatId(chat_id) => {
                // Private chat ids are the XOR of both participants' ids.
                let id = self.inner.state.my_id()? ^ chat_id;
                self.get_user_by_id(id).await
            }
            UserLookup::Phone(phone) => {
                let mut reply = self
                    .request(opcode::CONTACT_INFO_BY_PHONE, json!({ "phone": phone }))
                    .await?;
                let mut contact = match reply.get_mut("contact").map(Value::take) {
                    Some(c @ Value::Object(_)) => c,
                    _ => return Err(WebMaxError::UserNotFound),
                };
                contact["phone"] = Value::String(phone);
                User::from_profile(contact)
            }
        }
    }

    async fn get_user_by_id(&self, id: i64) -> Result<User> {
        let mut reply = self
            .request(opcode::CONTACT_INFO, json!({ "contactIds": [id] }))
            .await?;
        let contact = reply
            .get_mut("contacts")
            .and_then(|c| c.get_mut(0))
            .map(Value::take)
            .filter(|c| c.is_object())
            .ok_or(WebMaxError::UserNotFound)?;
        User::from_profile(contact)
    }
}

impl Message {
    /// Reply to this message in its chat.
    pub async fn reply(&self, client: &Client, text: &str) -> Result<Message> {
        client
            .send_message_with(self.chat_id, text, SendOptions::reply_to(self.id.clone()))
            .await
    }

    /// Send a plain message to this message's chat.
    pub async fn answer(&self, client: &Client, text: &str) -> Result<Message> {
        client.send_message(self.chat_id, text).await
    }

    /// Delete this message.
    pub async fn delete(&self, client: &Client, for_me: bool) -> Result<()> {
        client
            .delete_message(self.chat_id, [self.id.as_str()], for_me)
            .await
    }

    /// Replace this message's text.
    pub async fn edit(&self, client: &Client, text: &str) -> Result<Message> {
        client.edit_message(self.chat_id, &self.id, text).await
    }
}

/// Map an error reply to [`WebMaxError::Server`].
fn check_server_error(payload: Value) -> Result<Value> {
    let Some(error) = payload.get("error").and_then(Value::as_str) else {
        return Ok(payload);
    };
    let title = ["title", "localizedMessage", "message"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .unwrap_or(error);
    Err(WebMaxError::Server {
        error: error.to_string(),
        title: title.to_string(),
    })
}

fn take_field(payload: &mut Value, key: &str) -> Result<Value> {
    payload
        .get_mut(key)
        .map(Value::take)
        .filter(|v| !v.is_null())
        .ok_or_else(|| WebMaxError::Protocol(format!("reply has no {}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let client = ClientBuilder::new().build();
        assert!(!client.is_connected());
        assert!(client.me().is_none());
        assert!(client.token().is_none());
        assert!(client.registry().is_empty());
    }

    #[test]
    fn test_builder_default() {
        let builder = ClientBuilder::default();
        assert_eq!(builder.config.url, crate::config::DEFAULT_URL);
    }

    #[test]
    fn test_builder_method_chaining() {
        let client = Client::builder()
            .token("t0k3n")
            .phone("+70000000000")
            .on(Filter::accept_all(), |_client, _event| async { Ok(()) })
            .on_message(Filter::command("start"), |_client, _message| async { Ok(()) })
            .on_connect(|_client| async { Ok(()) })
            .build();

        assert_eq!(client.token().as_deref(), Some("t0k3n"));
        assert_eq!(client.phone(), Some("+70000000000"));
        assert_eq!(client.registry().len(), 2);
    }

    #[test]
    fn test_builder_configuration() {
        let client = Client::builder()
            .url("ws://localhost:9000/ws")
            .origin("http://localhost")
            .request_timeout(Duration::from_secs(3))
            .max_concurrent_handlers(8)
            .max_pending_frames(32)
            .channel_capacity(16)
            .backpressure_timeout(Duration::from_millis(250))
            .push_opcode(130)
            .push_opcode(130)
            .build();

        let config = client.config();
        assert_eq!(config.url, "ws://localhost:9000/ws");
        assert_eq!(config.origin.as_deref(), Some("http://localhost"));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.max_concurrent_handlers, 8);
        assert_eq!(config.writer.max_pending_frames, 32);
        assert_eq!(config.writer.channel_capacity, 16);
        assert_eq!(config.writer.backpressure_timeout, Duration::from_millis(250));
        assert_eq!(config.push_opcodes, vec![opcode::NOTIF_MESSAGE, 130]);
    }

    #[test]
    fn test_set_token() {
        let client = Client::builder().build();
        client.set_token("new");
        assert_eq!(client.token().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_connect_without_token_fails() {
        let client = Client::builder().build();
        let (sink, source, _peer) = transport::channel();
        let result = client.connect_with(sink, source).await;
        assert!(matches!(result, Err(WebMaxError::MissingToken)));
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let client = Client::builder().build();
        assert!(matches!(
            client.send_message(1, "hi").await,
            Err(WebMaxError::ConnectionClosed)
        ));
        assert!(matches!(
            client.pin_chat(1).await,
            Err(WebMaxError::ConnectionClosed)
        ));
        assert_eq!(client.wait_for_shutdown().await, CloseReason::Stopped);
    }

    #[tokio::test]
    async fn test_chat_lookup_requires_identity() {
        let client = Client::builder().build();
        let result = client.get_user(UserLookup::ChatId(5)).await;
        assert!(matches!(result, Err(WebMaxError::Unauthenticated)));
    }

    #[test]
    fn test_check_server_error() {
        let ok = check_server_error(json!({"token": "x"})).unwrap();
        assert_eq!(ok["token"], "x");

        let err = check_server_error(json!({
            "error": "verify.code.wrong",
            "title": "Wrong code",
        }))
        .unwrap_err();
        assert!(err.is_wrong_code());
        assert_eq!(err.to_string(), "Wrong code (verify.code.wrong)");

        let err = check_server_error(json!({
            "error": "phone.invalid",
            "localizedMessage": "Bad phone",
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Bad phone (phone.invalid)");
    }

    #[test]
    fn test_send_options() {
        let options = SendOptions::default();
        assert!(options.notify);
        assert!(options.reply_to.is_none());

        let options = SendOptions::reply_to("42").notify(false);
        assert_eq!(options.reply_to.as_deref(), Some("42"));
        assert!(!options.notify);
    }

    #[test]
    fn test_take_field() {
        let mut payload = json!({"profile": {"id": 1}, "empty": null});
        assert_eq!(take_field(&mut payload, "profile").unwrap(), json!({"id": 1}));
        assert!(take_field(&mut payload, "empty").is_err());
        assert!(take_field(&mut payload, "missing").is_err());
    }
}
