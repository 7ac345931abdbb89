//! In-process bus hub.
//!
//! [`MemoryHub`] is a complete bus in one process: every connection made
//! through it sees every publish, the publisher included, exactly as the
//! real bus behaves with echo on. Used by the test suite and handy for
//! local development when no bus is running.
//!
//! The hub skips the wire handshake but keeps the authentication decision:
//! construct it with [`MemoryHub::with_allowed_keys`] and connections from
//! seeds outside the allowlist are rejected the same way the real bus
//! rejects them.

use crate::auth::CredentialSeed;
use crate::error::{ConnectError, ErrorCode, TransportError};
use crate::event_handlers::{DisconnectReason, EventHandlers};
use crate::timeouts::SkiffTimeouts;
use crate::transport::{BusConnector, BusTransport, TopicFeed};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::error::TrySendError;

/// In-process bus hub; implements [`BusConnector`].
///
/// Cheap to clone: all clones share the hub. The `server_url` passed to
/// `connect` is ignored, so any placeholder (for example `memory://local`)
/// works.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    /// `None` accepts any key; `Some` is an allowlist of base64 public keys.
    allowed_keys: Option<HashSet<String>>,
    connections: RwLock<Vec<Weak<MemoryTransport>>>,
}

impl MemoryHub {
    /// Create a hub that accepts any credential seed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a hub that only accepts seeds whose derived public key is in
    /// `keys` (base64, as returned by [`CredentialSeed::public_key`]).
    pub fn with_allowed_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                allowed_keys: Some(keys.into_iter().collect()),
                connections: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.live_connections().len()
    }

    /// Total attached topic feeds across all live connections.
    pub fn subscription_count(&self) -> usize {
        self.live_connections().iter().map(|c| c.feed_count()).sum()
    }

    /// Kill every live connection, as if the bus went away.
    ///
    /// Each connection turns dead and fires its `on_disconnect` handler;
    /// clients observe the loss lazily on their next operation.
    pub fn drop_connections(&self) {
        for conn in self.live_connections() {
            conn.kill("connection dropped by hub");
        }
    }

    fn live_connections(&self) -> Vec<Arc<MemoryTransport>> {
        let mut guard = self.inner.connections.write();
        guard.retain(|weak| weak.strong_count() > 0);
        guard
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.is_alive())
            .collect()
    }

    fn register(&self, conn: &Arc<MemoryTransport>) {
        self.inner.connections.write().push(Arc::downgrade(conn));
    }

    /// Route one payload to every live connection subscribed to `topic`.
    fn route(&self, topic: &str, payload: &Bytes) {
        for conn in self.live_connections() {
            conn.deliver(topic, payload.clone());
        }
    }
}

#[async_trait]
impl BusConnector for MemoryHub {
    async fn connect(
        &self,
        _server_url: &str,
        seed: CredentialSeed,
        _timeouts: &SkiffTimeouts,
        events: &EventHandlers,
    ) -> Result<Arc<dyn BusTransport>, ConnectError> {
        let public_key = seed.public_key();
        if let Some(allowed) = &self.inner.allowed_keys {
            if !allowed.contains(&public_key) {
                let err = TransportError::new(
                    ErrorCode::AuthRejected,
                    format!("public key {} is not authorized", public_key),
                );
                events.emit_error(err.clone());
                return Err(ConnectError::Authentication(err));
            }
        }

        let conn = Arc::new(MemoryTransport {
            hub: self.clone(),
            feeds: RwLock::new(HashMap::new()),
            alive: AtomicBool::new(true),
            events: events.clone(),
        });
        self.register(&conn);

        log::debug!("[skiff-link] memory hub accepted connection ({})", public_key);
        events.emit_connect();
        Ok(conn)
    }
}

/// One live connection to a [`MemoryHub`].
pub struct MemoryTransport {
    hub: MemoryHub,
    feeds: RwLock<HashMap<String, FeedSlot>>,
    alive: AtomicBool,
    events: EventHandlers,
}

struct FeedSlot {
    feed: TopicFeed,
    dropped: AtomicU64,
}

impl MemoryTransport {
    /// Push a payload into this connection's feed for `topic`, if any.
    ///
    /// A full feed drops the payload (reject-new); a closed feed is skipped
    /// and cleaned up on the next subscribe/unsubscribe for the topic.
    fn deliver(&self, topic: &str, payload: Bytes) {
        let feeds = self.feeds.read();
        let Some(slot) = feeds.get(topic) else {
            return;
        };
        match slot.feed.try_send(payload) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                let dropped = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    "[skiff-link] feed full for topic '{}', dropping message ({} dropped so far)",
                    topic,
                    dropped
                );
            },
            Err(TrySendError::Closed(_)) => {},
        }
    }

    fn feed_count(&self) -> usize {
        self.feeds.read().len()
    }

    /// Turn the connection dead and notify, once.
    fn kill(&self, reason: &str) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.feeds.write().clear();
            self.events.emit_disconnect(DisconnectReason::new(reason));
        }
    }

    fn check_alive(&self) -> Result<(), TransportError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(TransportError::connection_lost("connection is closed"))
        }
    }
}

#[async_trait]
impl BusTransport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.check_alive()?;
        self.hub.route(topic, &payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, feed: TopicFeed) -> Result<(), TransportError> {
        self.check_alive()?;
        self.feeds.write().insert(
            topic.to_string(),
            FeedSlot {
                feed,
                dropped: AtomicU64::new(0),
            },
        );
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.check_alive()?;
        self.feeds.write().remove(topic);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn drain(&self) -> Result<(), TransportError> {
        // Nothing queues in-process, so drain is just a clean close.
        self.kill("connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn connect(hub: &MemoryHub, seed: &str) -> Arc<dyn BusTransport> {
        hub.connect(
            "memory://test",
            CredentialSeed::new(seed),
            &SkiffTimeouts::fast(),
            &EventHandlers::new(),
        )
        .await
        .expect("memory connect should succeed")
    }

    #[tokio::test]
    async fn test_publish_echoes_to_own_subscription() {
        let hub = MemoryHub::new();
        let conn = connect(&hub, "seed-a").await;

        let (feed_tx, mut feed_rx) = mpsc::channel(8);
        conn.subscribe("prices", feed_tx).await.unwrap();
        conn.publish("prices", Bytes::from_static(b"42.5")).await.unwrap();

        let payload = feed_rx.recv().await.expect("payload should arrive");
        assert_eq!(payload, Bytes::from_static(b"42.5"));
    }

    #[tokio::test]
    async fn test_publish_reaches_other_connections() {
        let hub = MemoryHub::new();
        let sender = connect(&hub, "seed-a").await;
        let receiver = connect(&hub, "seed-b").await;
        assert_eq!(hub.connection_count(), 2);

        let (feed_tx, mut feed_rx) = mpsc::channel(8);
        receiver.subscribe("orders", feed_tx).await.unwrap();
        sender.publish("orders", Bytes::from_static(b"buy")).await.unwrap();

        let payload = feed_rx.recv().await.expect("payload should arrive");
        assert_eq!(payload, Bytes::from_static(b"buy"));
    }

    #[tokio::test]
    async fn test_allowlist_rejects_unknown_key() {
        let authorized = CredentialSeed::new("the-one-seed");
        let hub = MemoryHub::with_allowed_keys([authorized.public_key()]);

        let err = hub
            .connect(
                "memory://test",
                CredentialSeed::new("some-other-seed"),
                &SkiffTimeouts::fast(),
                &EventHandlers::new(),
            )
            .await
            .err()
            .expect("unknown key must be rejected");
        match err {
            ConnectError::Authentication(e) => assert_eq!(e.code, ErrorCode::AuthRejected),
            other => panic!("expected Authentication error, got {:?}", other),
        }

        hub.connect(
            "memory://test",
            authorized,
            &SkiffTimeouts::fast(),
            &EventHandlers::new(),
        )
        .await
        .expect("allowlisted key must connect");
    }

    #[tokio::test]
    async fn test_full_feed_drops_new_payloads() {
        let hub = MemoryHub::new();
        let conn = connect(&hub, "seed-a").await;

        let (feed_tx, mut feed_rx) = mpsc::channel(1);
        conn.subscribe("prices", feed_tx).await.unwrap();

        conn.publish("prices", Bytes::from_static(b"kept")).await.unwrap();
        conn.publish("prices", Bytes::from_static(b"dropped")).await.unwrap();

        assert_eq!(feed_rx.recv().await.unwrap(), Bytes::from_static(b"kept"));
        assert!(
            feed_rx.try_recv().is_err(),
            "overflowing payload must be dropped, not queued"
        );
    }

    #[tokio::test]
    async fn test_subscribe_replaces_existing_feed() {
        let hub = MemoryHub::new();
        let conn = connect(&hub, "seed-a").await;

        let (old_tx, mut old_rx) = mpsc::channel(8);
        let (new_tx, mut new_rx) = mpsc::channel(8);
        conn.subscribe("prices", old_tx).await.unwrap();
        conn.subscribe("prices", new_tx).await.unwrap();
        assert_eq!(hub.subscription_count(), 1);

        conn.publish("prices", Bytes::from_static(b"tick")).await.unwrap();
        assert_eq!(new_rx.recv().await.unwrap(), Bytes::from_static(b"tick"));
        assert!(old_rx.recv().await.is_none(), "old feed is dropped");
    }

    #[tokio::test]
    async fn test_drop_connections_kills_and_notifies() {
        let hub = MemoryHub::new();
        let disconnected = Arc::new(AtomicBool::new(false));
        let flag = disconnected.clone();
        let events = EventHandlers::new().on_disconnect(move |_reason| {
            flag.store(true, Ordering::SeqCst);
        });

        let conn = hub
            .connect(
                "memory://test",
                CredentialSeed::new("seed-a"),
                &SkiffTimeouts::fast(),
                &events,
            )
            .await
            .unwrap();
        assert!(conn.is_alive());

        hub.drop_connections();
        assert!(!conn.is_alive());
        assert!(disconnected.load(Ordering::SeqCst), "on_disconnect must fire");

        let err = conn
            .publish("prices", Bytes::from_static(b"tick"))
            .await
            .expect_err("publish on a dead connection must fail");
        assert_eq!(err.code, ErrorCode::ConnectionLost);
    }

    #[tokio::test]
    async fn test_drain_is_idempotent() {
        let hub = MemoryHub::new();
        let conn = connect(&hub, "seed-a").await;

        conn.drain().await.expect("first drain succeeds");
        assert!(!conn.is_alive());
        conn.drain().await.expect("second drain is a no-op");
        assert_eq!(hub.connection_count(), 0);
    }
}
