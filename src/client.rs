//! Skiff client with builder pattern.
//!
//! Provides the primary interface for connecting to a Skiff bus,
//! multiplexing topic subscriptions over the single connection, and
//! tearing everything down cleanly.

use crate::{
    auth::CredentialSeed,
    codec,
    error::{CloseError, ConfigError, ConnectError, PublishError, SubscribeError},
    event_handlers::EventHandlers,
    registry::SubscriptionRegistry,
    subscription::{MessageHandler, SubscriptionHandle},
    timeouts::SkiffTimeouts,
    transport::{ws::WsConnector, BusConnector, BusTransport},
};
use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
    sync::Arc,
};
use tokio::sync::{mpsc, Mutex};
use url::Url;

/// Default bound of each per-topic delivery feed, in messages.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

// ── Connection state ────────────────────────────────────────────────────────

/// Lifecycle of the client's single bus connection.
///
/// `Disconnected → Connecting → Connected → Draining → Disconnected`.
/// Only `Connected` permits publish/subscribe; teardown always ends in
/// `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Draining = 3,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Draining => "draining",
        };
        write!(f, "{}", s)
    }
}

/// Lock-free cell for the observable connection state.
///
/// Written only by the structural operations (which serialize through the
/// session mutex); read by anyone.
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> ConnectionState {
        match self.0.load(Ordering::SeqCst) {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Draining,
        }
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

// ── Session ─────────────────────────────────────────────────────────────────

/// Everything that exists only between `connect()` and teardown.
///
/// All structural mutations (connect, subscribe, unsubscribe, close, and
/// the lazy dead-transport reconciliation they perform) go through the one
/// mutex holding this.
struct Session {
    transport: Option<Arc<dyn BusTransport>>,
    registry: SubscriptionRegistry,
}

struct ClientInner {
    server_url: String,
    queue_capacity: usize,
    timeouts: SkiffTimeouts,
    events: EventHandlers,
    connector: Arc<dyn BusConnector>,
    state: StateCell,
    session: Mutex<Session>,
}

// ── SkiffClient ─────────────────────────────────────────────────────────────

/// Client for a Skiff message bus.
///
/// One instance owns at most one live bus connection and multiplexes any
/// number of topic subscriptions over it. The handle is cheap to clone
/// (all clones share the same connection); build one with
/// [`SkiffClient::builder`] and pass clones to whatever needs the bus.
///
/// Construction does no I/O. The connection is dialed by
/// [`connect`](SkiffClient::connect) and must be released with
/// [`close`](SkiffClient::close); dropping the last clone tears the
/// connection down without the drain handshake.
///
/// # Examples
///
/// ```rust,no_run
/// use skiff_link::{CredentialSeed, SkiffClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = SkiffClient::builder()
///     .server_url("wss://bus.example.com/skiff")
///     .build()?;
///
/// client.connect(CredentialSeed::new("SKIFF-SEED-7F3A9C")).await?;
/// client
///     .subscribe("prices", |text| println!("price update: {}", text))
///     .await?;
/// client.publish("prices", "42.5").await?;
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SkiffClient {
    inner: Arc<ClientInner>,
}

impl SkiffClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> SkiffClientBuilder {
        SkiffClientBuilder::new()
    }

    /// Dial the configured server and authenticate with `seed`.
    ///
    /// The seed is consumed here: the transport derives the client's
    /// signing identity from it during the handshake and the material is
    /// zeroized afterwards. Suspends until the handshake completes,
    /// bounded by [`SkiffTimeouts::connect_timeout`] and
    /// [`SkiffTimeouts::auth_timeout`].
    ///
    /// Fails with [`ConnectError::AlreadyConnected`] while a connection is
    /// live; reconnecting after a completed [`close`](SkiffClient::close)
    /// is fine. On failure no connection is retained and a fresh `connect`
    /// may be attempted.
    pub async fn connect(&self, seed: CredentialSeed) -> Result<(), ConnectError> {
        let mut session = self.inner.session.lock().await;
        self.reconcile(&mut session);
        if session.transport.is_some() {
            return Err(ConnectError::AlreadyConnected);
        }

        self.inner.state.set(ConnectionState::Connecting);
        log::debug!("[skiff-link] connecting to {}", self.inner.server_url);
        let connected = self
            .inner
            .connector
            .connect(
                &self.inner.server_url,
                seed,
                &self.inner.timeouts,
                &self.inner.events,
            )
            .await;

        match connected {
            Ok(transport) => {
                session.transport = Some(transport);
                self.inner.state.set(ConnectionState::Connected);
                Ok(())
            },
            Err(e) => {
                self.inner.state.set(ConnectionState::Disconnected);
                Err(e)
            },
        }
    }

    /// Publish a text message on `topic`.
    ///
    /// Fire-and-forget: `Ok` means the frame was handed to the transport's
    /// writer, not that any subscriber received it. The bus delivers
    /// best-effort to whoever is subscribed at that moment.
    pub async fn publish(&self, topic: &str, message: &str) -> Result<(), PublishError> {
        let transport = {
            let mut session = self.inner.session.lock().await;
            self.reconcile(&mut session);
            match &session.transport {
                Some(transport) => Arc::clone(transport),
                None => return Err(PublishError::NotConnected),
            }
        };

        // Send outside the session lock so a slow writer never blocks
        // subscription changes or other publishers.
        let payload = codec::encode(message);
        transport
            .publish(topic, payload)
            .await
            .map_err(PublishError::Transport)
    }

    /// Subscribe to `topic`, invoking `handler` with each decoded message.
    ///
    /// At most one subscription per topic: subscribing again to the same
    /// topic retires the previous handler and replaces it. Returns once
    /// registration completes; delivery then runs on a dedicated task for
    /// the subscription's lifetime.
    ///
    /// The handler runs on that delivery task. A panicking handler is
    /// caught and logged per message; it never stops the subscription or
    /// affects other topics. A slow handler backs up only its own topic's
    /// feed (bounded by `queue_capacity`; overflow drops the newest
    /// messages).
    pub async fn subscribe(
        &self,
        topic: &str,
        handler: impl Fn(String) + Send + Sync + 'static,
    ) -> Result<(), SubscribeError> {
        let handler: MessageHandler = Arc::new(handler);
        let mut session = self.inner.session.lock().await;
        self.reconcile(&mut session);
        let transport = match &session.transport {
            Some(transport) => Arc::clone(transport),
            None => return Err(SubscribeError::NotConnected),
        };

        let (feed_tx, feed_rx) = mpsc::channel(self.inner.queue_capacity);
        let handle = SubscriptionHandle::spawn(topic.to_string(), feed_rx, handler);
        if let Err(e) = transport.subscribe(topic, feed_tx).await {
            handle.retire();
            return Err(SubscribeError::Transport(e));
        }

        if let Some(replaced) = session.registry.put(topic, handle) {
            log::debug!("[skiff-link] replacing existing subscription for '{}'", topic);
            replaced.retire();
        }
        log::debug!("[skiff-link] subscribed to '{}'", topic);
        Ok(())
    }

    /// Unsubscribe from `topic`.
    ///
    /// Idempotent while connected: a topic with no active subscription is
    /// a no-op. Otherwise the delivery task is stopped promptly (an
    /// in-flight handler invocation completes) and the transport feed is
    /// detached.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), SubscribeError> {
        let mut session = self.inner.session.lock().await;
        self.reconcile(&mut session);
        let transport = match &session.transport {
            Some(transport) => Arc::clone(transport),
            None => return Err(SubscribeError::NotConnected),
        };

        let handle = match session.registry.remove(topic) {
            Some(handle) => handle,
            None => return Ok(()),
        };
        handle.retire();
        transport
            .unsubscribe(topic)
            .await
            .map_err(SubscribeError::Transport)
    }

    /// Retire every active subscription.
    ///
    /// Local teardown always completes even when detaching a feed fails on
    /// the wire; the first wire failure is returned after the loop.
    pub async fn unsubscribe_all(&self) -> Result<(), SubscribeError> {
        let mut session = self.inner.session.lock().await;
        self.reconcile(&mut session);
        let transport = match &session.transport {
            Some(transport) => Arc::clone(transport),
            None => return Err(SubscribeError::NotConnected),
        };

        if session.registry.is_empty() {
            return Ok(());
        }
        retire_all(&mut session, &transport).await
    }

    /// Close the bus connection.
    ///
    /// Retires all subscriptions, drains the transport (queued outbound
    /// frames are flushed, further sends refused), then clears the handle.
    /// Local state is torn down and the client returns to
    /// [`ConnectionState::Disconnected`] regardless of the drain outcome;
    /// a drain failure is reported as [`CloseError::Drain`].
    ///
    /// Idempotent: closing a client that never connected, or closing
    /// twice, returns `Ok`.
    pub async fn close(&self) -> Result<(), CloseError> {
        let mut session = self.inner.session.lock().await;
        self.reconcile(&mut session);
        let transport = match session.transport.take() {
            Some(transport) => transport,
            None => {
                log::debug!("[skiff-link] close with no live connection, nothing to do");
                return Ok(());
            },
        };

        self.inner.state.set(ConnectionState::Draining);
        log::info!("[skiff-link] closing bus connection");

        // Wire failures while detaching feeds are logged inside retire_all;
        // close reports only the drain outcome.
        let _ = retire_all(&mut session, &transport).await;

        let drained = transport.drain().await;
        self.inner.state.set(ConnectionState::Disconnected);
        match drained {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("[skiff-link] connection drain failed: {}", e);
                Err(CloseError::Drain(e))
            },
        }
    }

    /// Current connection state.
    ///
    /// A connection the transport has detected as lost is observed here
    /// lazily: the state flips to `Disconnected` when the next structural
    /// operation notices the dead transport (the `on_disconnect` handler
    /// fires immediately, if registered).
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// `true` while the connection is established and usable.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of active subscriptions.
    pub async fn subscription_count(&self) -> usize {
        let mut session = self.inner.session.lock().await;
        self.reconcile(&mut session);
        session.registry.len()
    }

    /// Detect a transport that died since the last structural operation
    /// and reset the session.
    ///
    /// The transport already fired `on_disconnect` when it marked itself
    /// dead; this retires the orphaned delivery tasks, clears the handle,
    /// and flips the state so the current operation observes
    /// `Disconnected`.
    fn reconcile(&self, session: &mut Session) {
        let dead = match &session.transport {
            Some(transport) => !transport.is_alive(),
            None => false,
        };
        if !dead {
            return;
        }

        log::info!("[skiff-link] bus connection lost, resetting session");
        session.transport = None;
        for handle in session.registry.drain_all() {
            handle.retire();
        }
        self.inner.state.set(ConnectionState::Disconnected);
    }
}

/// Retire every registered subscription and detach its feed on the wire.
///
/// Local teardown runs for all entries even when wire calls fail; the
/// first failure is kept and returned at the end.
async fn retire_all(
    session: &mut Session,
    transport: &Arc<dyn BusTransport>,
) -> Result<(), SubscribeError> {
    let mut first_failure = None;
    for handle in session.registry.drain_all() {
        let topic = handle.topic().to_string();
        handle.retire();
        if let Err(e) = transport.unsubscribe(&topic).await {
            log::warn!("[skiff-link] failed to detach topic '{}': {}", topic, e);
            if first_failure.is_none() {
                first_failure = Some(e);
            }
        }
    }
    match first_failure {
        Some(e) => Err(SubscribeError::Transport(e)),
        None => Ok(()),
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Builder for configuring [`SkiffClient`] instances.
pub struct SkiffClientBuilder {
    server_url: Option<String>,
    queue_capacity: usize,
    timeouts: SkiffTimeouts,
    events: EventHandlers,
    connector: Option<Arc<dyn BusConnector>>,
}

impl SkiffClientBuilder {
    fn new() -> Self {
        Self {
            server_url: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeouts: SkiffTimeouts::default(),
            events: EventHandlers::new(),
            connector: None,
        }
    }

    /// Set the bus server URL (required).
    ///
    /// The URL must parse; scheme requirements beyond that belong to the
    /// transport (the default WebSocket transport wants `ws://` or
    /// `wss://` and rejects anything else at connect time).
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Set timeout configuration for connect, auth, drain, and keepalive.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use skiff_link::{SkiffClient, SkiffTimeouts};
    ///
    /// # fn example() -> Result<(), skiff_link::ConfigError> {
    /// let client = SkiffClient::builder()
    ///     .server_url("ws://localhost:4242")
    ///     .timeouts(SkiffTimeouts::fast())
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn timeouts(mut self, timeouts: SkiffTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Register lifecycle event handlers.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.events = handlers;
        self
    }

    /// Set the per-subscription delivery feed bound, in messages
    /// (default [`DEFAULT_QUEUE_CAPACITY`]).
    ///
    /// When a handler falls this far behind, the transport drops the
    /// newest incoming messages for that topic (with a logged warning)
    /// rather than stalling the connection.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Override the transport used by [`connect`](SkiffClient::connect).
    ///
    /// Defaults to the WebSocket transport ([`WsConnector`]). Tests and
    /// local development can pass a
    /// [`MemoryHub`](crate::transport::memory::MemoryHub) instead.
    pub fn connector(mut self, connector: impl BusConnector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Build the client. Performs no I/O.
    pub fn build(self) -> Result<SkiffClient, ConfigError> {
        let server_url = match self.server_url {
            Some(url) => url.trim().to_string(),
            None => return Err(ConfigError::MissingServerUrl),
        };
        if server_url.is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }
        if let Err(e) = Url::parse(&server_url) {
            return Err(ConfigError::InvalidServerUrl {
                url: server_url,
                reason: e.to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }

        let connector: Arc<dyn BusConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector::new()),
        };

        Ok(SkiffClient {
            inner: Arc::new(ClientInner {
                server_url,
                queue_capacity: self.queue_capacity,
                timeouts: self.timeouts,
                events: self.events,
                connector,
                state: StateCell::new(ConnectionState::Disconnected),
                session: Mutex::new(Session {
                    transport: None,
                    registry: SubscriptionRegistry::new(),
                }),
            }),
        })
    }
}
