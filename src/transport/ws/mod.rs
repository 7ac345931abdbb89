//! WebSocket bus transport.
//!
//! The production transport: one WebSocket connection to the bus, owned by
//! a background task ([`task`]), with the handle talking to it over a
//! bounded command channel.
//!
//! # Wire protocol
//!
//! Frames are JSON objects tagged by `type` (see [`frames`]); payloads are
//! base64 strings. The connect sequence:
//!
//! 1. client opens the WebSocket (`ws://` or `wss://`)
//! 2. server sends `welcome { nonce }`
//! 3. client sends `auth { public_key, signature }`, the signature being
//!    the seed-derived Ed25519 key over the raw nonce bytes
//! 4. server answers `auth_ok` (connection is live) or `auth_error`
//!    (connection is refused)
//!
//! After `auth_ok` the client sends `publish` / `subscribe` / `unsubscribe`
//! frames and receives `message` / `error` frames. Liveness is WebSocket
//! ping/pong, driven by [`SkiffTimeouts::keepalive_interval`] and
//! [`SkiffTimeouts::pong_timeout`].

pub(crate) mod frames;
mod task;

use crate::auth::CredentialSeed;
use crate::error::{ConnectError, ErrorCode, TransportError};
use crate::event_handlers::EventHandlers;
use crate::timeouts::SkiffTimeouts;
use crate::transport::{BusConnector, BusTransport, TopicFeed};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use task::{TransportCmd, WebSocketStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
pub(super) const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Connects to a Skiff bus over WebSocket. The default connector.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BusConnector for WsConnector {
    async fn connect(
        &self,
        server_url: &str,
        seed: CredentialSeed,
        timeouts: &SkiffTimeouts,
        events: &EventHandlers,
    ) -> Result<Arc<dyn BusTransport>, ConnectError> {
        let url = resolve_server_url(server_url).map_err(|err| {
            events.emit_error(err.clone());
            ConnectError::Unreachable(err)
        })?;

        log::debug!("[skiff-link] connecting to bus at {}", url);
        let connect_result = if SkiffTimeouts::is_no_timeout(timeouts.connect_timeout) {
            Ok(connect_async(url.as_str()).await)
        } else {
            tokio::time::timeout(timeouts.connect_timeout, connect_async(url.as_str())).await
        };

        let mut ws = match connect_result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                let err = TransportError::new(
                    ErrorCode::ConnectionRefused,
                    format!("failed to reach {}: {}", url, e),
                );
                events.emit_error(err.clone());
                return Err(ConnectError::Unreachable(err));
            },
            Err(_) => {
                let err = TransportError::timeout(format!(
                    "connect to {} timed out ({:?})",
                    url, timeouts.connect_timeout
                ));
                events.emit_error(err.clone());
                return Err(ConnectError::Unreachable(err));
            },
        };

        if let Err(e) = authenticate(&mut ws, &seed, timeouts.auth_timeout).await {
            if let Some(te) = e.transport_error() {
                events.emit_error(te.clone());
            }
            return Err(e);
        }

        log::info!("[skiff-link] authenticated to bus at {}", url);
        events.emit_connect();

        let (cmd_tx, cmd_rx) = mpsc::channel(task::CMD_CHANNEL_CAPACITY);
        let alive = Arc::new(AtomicBool::new(true));
        let socket_task = tokio::spawn(task::socket_task(
            ws,
            cmd_rx,
            alive.clone(),
            events.clone(),
            timeouts.clone(),
        ));

        Ok(Arc::new(WsTransport {
            cmd_tx,
            alive,
            drain_timeout: timeouts.drain_timeout,
            _task: socket_task,
        }))
    }
}

/// Handle to a live WebSocket bus connection.
///
/// All methods forward to the background [`task::socket_task`] and await
/// its reply.
pub struct WsTransport {
    cmd_tx: mpsc::Sender<TransportCmd>,
    alive: Arc<AtomicBool>,
    drain_timeout: Duration,
    _task: JoinHandle<()>,
}

impl WsTransport {
    async fn request(
        &self,
        make_cmd: impl FnOnce(oneshot::Sender<Result<(), TransportError>>) -> TransportCmd,
    ) -> Result<(), TransportError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(make_cmd(result_tx))
            .await
            .map_err(|_| TransportError::connection_lost("connection task is not running"))?;
        result_rx
            .await
            .map_err(|_| TransportError::connection_lost("connection task died"))?
    }
}

#[async_trait]
impl BusTransport for WsTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        let topic = topic.to_string();
        self.request(|result_tx| TransportCmd::Publish {
            topic,
            payload,
            result_tx,
        })
        .await
    }

    async fn subscribe(&self, topic: &str, feed: TopicFeed) -> Result<(), TransportError> {
        let topic = topic.to_string();
        self.request(|result_tx| TransportCmd::Subscribe {
            topic,
            feed,
            result_tx,
        })
        .await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let topic = topic.to_string();
        self.request(|result_tx| TransportCmd::Unsubscribe { topic, result_tx })
            .await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn drain(&self) -> Result<(), TransportError> {
        let drain = self.request(|result_tx| TransportCmd::Drain { result_tx });
        if SkiffTimeouts::is_no_timeout(self.drain_timeout) {
            return drain.await;
        }
        match tokio::time::timeout(self.drain_timeout, drain).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(format!(
                "drain did not complete within {:?}",
                self.drain_timeout
            ))),
        }
    }
}

/// Validate the configured bus endpoint.
fn resolve_server_url(server_url: &str) -> Result<Url, TransportError> {
    let url = Url::parse(server_url.trim()).map_err(|e| {
        TransportError::new(
            ErrorCode::ConnectionRefused,
            format!("invalid server url '{}': {}", server_url, e),
        )
    })?;

    match url.scheme() {
        "ws" | "wss" => {},
        other => {
            return Err(TransportError::new(
                ErrorCode::ConnectionRefused,
                format!("server url must use ws:// or wss:// (found '{}')", other),
            ));
        },
    }

    if url.host_str().is_none() {
        return Err(TransportError::new(
            ErrorCode::ConnectionRefused,
            "server url must include a host".to_string(),
        ));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(TransportError::new(
            ErrorCode::ConnectionRefused,
            "server url must not embed credentials".to_string(),
        ));
    }

    Ok(url)
}

/// Run the challenge-response handshake: wait for `welcome`, answer with
/// `auth`, wait for the verdict.
async fn authenticate(
    ws: &mut WebSocketStream,
    seed: &CredentialSeed,
    auth_timeout: Duration,
) -> Result<(), ConnectError> {
    let auth_window = if SkiffTimeouts::is_no_timeout(auth_timeout) {
        FAR_FUTURE
    } else {
        auth_timeout
    };
    let deadline = Instant::now() + auth_window;

    let nonce_b64 = match next_handshake_frame(ws, deadline, auth_timeout).await? {
        frames::ServerFrame::Welcome { nonce } => nonce,
        other => {
            return Err(ConnectError::Handshake(TransportError::protocol(format!(
                "expected welcome frame, got {:?}",
                other
            ))));
        },
    };
    let nonce = general_purpose::STANDARD.decode(&nonce_b64).map_err(|e| {
        ConnectError::Handshake(TransportError::protocol(format!(
            "welcome nonce is not valid base64: {}",
            e
        )))
    })?;

    let auth = frames::ClientFrame::Auth {
        public_key: seed.public_key(),
        signature: seed.sign_nonce(&nonce),
    };
    let payload = serde_json::to_string(&auth).map_err(|e| {
        ConnectError::Handshake(TransportError::protocol(format!(
            "failed to serialize auth frame: {}",
            e
        )))
    })?;
    ws.send(Message::Text(payload.into())).await.map_err(|e| {
        ConnectError::Handshake(TransportError::connection_lost(format!(
            "failed to send auth frame: {}",
            e
        )))
    })?;

    // Wait for the verdict, tolerating unrelated frames in between.
    loop {
        match next_handshake_frame(ws, deadline, auth_timeout).await? {
            frames::ServerFrame::AuthOk => return Ok(()),
            frames::ServerFrame::AuthError { code, message } => {
                return Err(ConnectError::Authentication(TransportError::new(
                    code, message,
                )));
            },
            _ => continue,
        }
    }
}

/// Read the next parseable server frame, replying to pings and skipping
/// non-text frames, bounded by the handshake deadline.
async fn next_handshake_frame(
    ws: &mut WebSocketStream,
    deadline: Instant,
    auth_timeout: Duration,
) -> Result<frames::ServerFrame, ConnectError> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(handshake_timeout(auth_timeout));
        }

        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return serde_json::from_str::<frames::ServerFrame>(&text).map_err(|e| {
                    ConnectError::Handshake(TransportError::protocol(format!(
                        "unparseable handshake frame: {}",
                        e
                    )))
                });
            },
            Ok(Some(Ok(Message::Ping(payload)))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            },
            Ok(Some(Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_)))) => continue,
            Ok(Some(Ok(Message::Close(_)))) => {
                return Err(ConnectError::Handshake(TransportError::connection_lost(
                    "connection closed during handshake",
                )));
            },
            Ok(Some(Err(e))) => {
                return Err(ConnectError::Handshake(TransportError::connection_lost(
                    format!("websocket error during handshake: {}", e),
                )));
            },
            Ok(None) => {
                return Err(ConnectError::Handshake(TransportError::connection_lost(
                    "connection ended before handshake completed",
                )));
            },
            Err(_) => return Err(handshake_timeout(auth_timeout)),
        }
    }
}

fn handshake_timeout(auth_timeout: Duration) -> ConnectError {
    ConnectError::Handshake(TransportError::timeout(format!(
        "authentication handshake timed out ({:?})",
        auth_timeout
    )))
}
