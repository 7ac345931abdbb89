//! Pluggable bus transports.
//!
//! The client core never talks to a socket directly; it drives a
//! [`BusTransport`] obtained from a [`BusConnector`]. Two implementations
//! ship with the crate:
//!
//! - [`ws::WsConnector`]: the production WebSocket transport (default).
//! - [`memory::MemoryHub`]: an in-process hub for tests and local
//!   development.
//!
//! A transport is *dead* once the underlying connection is gone; all
//! operations on a dead transport fail with `ConnectionLost` and the client
//! reconciles its state on the next structural call.

pub mod memory;
pub mod ws;

use crate::auth::CredentialSeed;
use crate::error::{ConnectError, TransportError};
use crate::event_handlers::EventHandlers;
use crate::timeouts::SkiffTimeouts;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sending half of a per-topic feed channel.
///
/// The transport pushes every inbound payload for a subscribed topic into
/// its feed; the client's delivery task consumes the other half. Feeds are
/// bounded: when one is full the transport drops the incoming payload
/// rather than block its read loop.
pub type TopicFeed = mpsc::Sender<Bytes>;

/// Dials the bus and performs the authentication handshake.
///
/// Implementations validate `server_url` themselves; the client core treats
/// it as opaque configuration. The seed is consumed by the attempt whether
/// or not it succeeds.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Establish an authenticated connection to the bus.
    ///
    /// Suspends until the handshake completes, bounded by
    /// `timeouts.connect_timeout` and `timeouts.auth_timeout`. The returned
    /// transport is live and has already fired `events.on_connect`.
    async fn connect(
        &self,
        server_url: &str,
        seed: CredentialSeed,
        timeouts: &SkiffTimeouts,
        events: &EventHandlers,
    ) -> Result<Arc<dyn BusTransport>, ConnectError>;
}

/// One live, authenticated bus connection.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Hand an encoded payload to the bus for `topic`.
    ///
    /// Success means the frame reached the transport's writer; delivery is
    /// best-effort from there (the bus makes no stronger promise).
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Attach `feed` as the destination for inbound payloads on `topic`.
    ///
    /// At most one feed per topic: attaching to an already-subscribed topic
    /// replaces the previous feed, which is dropped.
    async fn subscribe(&self, topic: &str, feed: TopicFeed) -> Result<(), TransportError>;

    /// Detach the feed for `topic`, telling the bus to stop sending.
    /// Unknown topics are a no-op.
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Whether the connection is still up.
    ///
    /// Turns false when the transport detects a disconnect; it never turns
    /// true again. The client polls this to reconcile lazily.
    fn is_alive(&self) -> bool;

    /// Flush queued outbound frames, then disconnect.
    ///
    /// After drain the transport is dead regardless of the result. Draining
    /// an already-dead transport returns Ok.
    async fn drain(&self) -> Result<(), TransportError>;
}
