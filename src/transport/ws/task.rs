//! Background task that owns the WebSocket stream.
//!
//! The transport handle never touches the socket: every operation becomes a
//! [`TransportCmd`] on a bounded channel, answered over a oneshot. The task
//! multiplexes commands, inbound frames, and the keepalive cycle with one
//! biased `select!`; when the socket dies it keeps answering commands with
//! `ConnectionLost` until the handle is dropped.

use crate::error::{ErrorCode, TransportError};
use crate::event_handlers::{DisconnectReason, EventHandlers};
use crate::timeouts::SkiffTimeouts;
use crate::transport::ws::frames::{self, ClientFrame, ServerFrame};
use crate::transport::TopicFeed;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;

use super::FAR_FUTURE;

/// Capacity of the command channel between the handle and the task.
pub(super) const CMD_CHANNEL_CAPACITY: usize = 256;

pub(super) type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Commands sent from the transport handle to the background task.
pub(super) enum TransportCmd {
    Publish {
        topic: String,
        payload: Bytes,
        result_tx: oneshot::Sender<Result<(), TransportError>>,
    },
    Subscribe {
        topic: String,
        feed: TopicFeed,
        result_tx: oneshot::Sender<Result<(), TransportError>>,
    },
    Unsubscribe {
        topic: String,
        result_tx: oneshot::Sender<Result<(), TransportError>>,
    },
    Drain {
        result_tx: oneshot::Sender<Result<(), TransportError>>,
    },
}

/// Feed for one subscribed topic, with its running overflow count.
struct FeedSlot {
    feed: TopicFeed,
    dropped: u64,
}

/// Own the socket until drain, handle drop, or connection loss; then answer
/// the remaining commands as dead until the handle goes away.
pub(super) async fn socket_task(
    mut ws: WebSocketStream,
    mut cmd_rx: mpsc::Receiver<TransportCmd>,
    alive: Arc<AtomicBool>,
    events: EventHandlers,
    timeouts: SkiffTimeouts,
) {
    let mut feeds: HashMap<String, FeedSlot> = HashMap::new();

    let has_keepalive = !SkiffTimeouts::is_no_timeout(timeouts.keepalive_interval);
    let keepalive_dur = if has_keepalive {
        timeouts.keepalive_interval
    } else {
        FAR_FUTURE
    };
    let has_pong_timeout = has_keepalive && !SkiffTimeouts::is_no_timeout(timeouts.pong_timeout);
    let mut awaiting_pong = false;
    let mut idle_deadline = Instant::now() + keepalive_dur;
    let mut pong_deadline = Instant::now() + FAR_FUTURE;

    loop {
        let idle_sleep = tokio::time::sleep_until(idle_deadline);
        tokio::pin!(idle_sleep);
        let pong_sleep = tokio::time::sleep_until(pong_deadline);
        tokio::pin!(pong_sleep);

        tokio::select! {
            biased;

            _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                log::warn!(
                    "[skiff-link] pong timeout ({:?}), bus unresponsive",
                    timeouts.pong_timeout
                );
                events.emit_error(TransportError::timeout(format!(
                    "no pong within {:?}",
                    timeouts.pong_timeout
                )));
                events.emit_disconnect(DisconnectReason::new("pong timeout"));
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(TransportCmd::Publish { topic, payload, result_tx }) => {
                        let frame = ClientFrame::Publish {
                            topic,
                            payload: frames::encode_payload(&payload),
                        };
                        let result = send_frame(&mut ws, &frame).await;
                        let lost = connection_was_lost(&result);
                        let _ = result_tx.send(result);
                        if lost {
                            events.emit_disconnect(DisconnectReason::new("send failed"));
                            break;
                        }
                    },
                    Some(TransportCmd::Subscribe { topic, feed, result_tx }) => {
                        let frame = ClientFrame::Subscribe { topic: topic.clone() };
                        let result = send_frame(&mut ws, &frame).await;
                        let lost = connection_was_lost(&result);
                        if result.is_ok() {
                            // Replacing an existing feed drops the old sender.
                            feeds.insert(topic, FeedSlot { feed, dropped: 0 });
                        }
                        let _ = result_tx.send(result);
                        if lost {
                            events.emit_disconnect(DisconnectReason::new("send failed"));
                            break;
                        }
                    },
                    Some(TransportCmd::Unsubscribe { topic, result_tx }) => {
                        if feeds.remove(&topic).is_none() {
                            let _ = result_tx.send(Ok(()));
                        } else {
                            let frame = ClientFrame::Unsubscribe { topic };
                            let result = send_frame(&mut ws, &frame).await;
                            let lost = connection_was_lost(&result);
                            let _ = result_tx.send(result);
                            if lost {
                                events.emit_disconnect(DisconnectReason::new("send failed"));
                                break;
                            }
                        }
                    },
                    Some(TransportCmd::Drain { result_tx }) => {
                        let result = shutdown(&mut ws, &mut feeds).await;
                        events.emit_disconnect(DisconnectReason::new("client disconnected"));
                        let _ = result_tx.send(result);
                        break;
                    },
                    None => {
                        // Handle dropped without an explicit drain.
                        let _ = shutdown(&mut ws, &mut feeds).await;
                        events.emit_disconnect(DisconnectReason::new("client disconnected"));
                        break;
                    },
                }
            }

            _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                    log::warn!("[skiff-link] keepalive ping failed: {}", e);
                    events.emit_disconnect(DisconnectReason::new(format!(
                        "keepalive ping failed: {}", e
                    )));
                    break;
                }
                if has_pong_timeout {
                    awaiting_pong = true;
                    pong_deadline = Instant::now() + timeouts.pong_timeout;
                }
                idle_deadline = Instant::now() + keepalive_dur;
            }

            frame = ws.next() => {
                // Any inbound traffic proves the connection is alive.
                idle_deadline = Instant::now() + keepalive_dur;
                if awaiting_pong {
                    awaiting_pong = false;
                    pong_deadline = Instant::now() + FAR_FUTURE;
                }

                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_server_frame(&text, &mut feeds, &events);
                    },
                    Some(Ok(Message::Binary(_))) => {
                        log::warn!("[skiff-link] ignoring unexpected binary frame");
                    },
                    Some(Ok(Message::Close(close_frame))) => {
                        let reason = match close_frame {
                            Some(f) => DisconnectReason::with_code(f.reason.to_string(), f.code.into()),
                            None => DisconnectReason::new("bus closed the connection"),
                        };
                        events.emit_disconnect(reason);
                        break;
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    },
                    Some(Ok(Message::Pong(_))) => {
                        log::debug!("[skiff-link] keepalive: received pong");
                    },
                    Some(Ok(Message::Frame(_))) => {},
                    Some(Err(e)) => {
                        let msg = e.to_string();
                        events.emit_error(TransportError::connection_lost(msg.clone()));
                        events.emit_disconnect(DisconnectReason::new(format!(
                            "websocket error: {}", msg
                        )));
                        break;
                    },
                    None => {
                        events.emit_disconnect(DisconnectReason::new("websocket stream ended"));
                        break;
                    },
                }
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    feeds.clear();
    // Release the socket now; the handle may outlive the connection.
    drop(ws);
    run_dead(cmd_rx).await;
}

/// Answer commands on a dead connection until the handle drops.
async fn run_dead(mut cmd_rx: mpsc::Receiver<TransportCmd>) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            TransportCmd::Publish { result_tx, .. }
            | TransportCmd::Subscribe { result_tx, .. }
            | TransportCmd::Unsubscribe { result_tx, .. } => {
                let _ = result_tx.send(Err(TransportError::connection_lost(
                    "connection is closed",
                )));
            },
            TransportCmd::Drain { result_tx } => {
                let _ = result_tx.send(Ok(()));
            },
        }
    }
}

/// Serialize and send one frame.
async fn send_frame(ws: &mut WebSocketStream, frame: &ClientFrame) -> Result<(), TransportError> {
    let payload = serde_json::to_string(frame)
        .map_err(|e| TransportError::protocol(format!("failed to serialize frame: {}", e)))?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| TransportError::connection_lost(format!("send failed: {}", e)))
}

fn connection_was_lost(result: &Result<(), TransportError>) -> bool {
    matches!(result, Err(e) if e.code == ErrorCode::ConnectionLost)
}

/// Tell the bus each remaining topic is going away, flush everything queued,
/// and close the socket.
async fn shutdown(
    ws: &mut WebSocketStream,
    feeds: &mut HashMap<String, FeedSlot>,
) -> Result<(), TransportError> {
    for topic in feeds.keys() {
        let frame = ClientFrame::Unsubscribe {
            topic: topic.clone(),
        };
        if let Err(e) = send_frame(ws, &frame).await {
            log::debug!("[skiff-link] unsubscribe during drain failed: {}", e);
            let _ = ws.close(None).await;
            return Err(e);
        }
    }
    feeds.clear();

    let flushed = ws
        .flush()
        .await
        .map_err(|e| TransportError::connection_lost(format!("drain flush failed: {}", e)));
    let _ = ws.close(None).await;
    flushed
}

/// Dispatch one parsed server frame.
fn handle_server_frame(text: &str, feeds: &mut HashMap<String, FeedSlot>, events: &EventHandlers) {
    let frame = match serde_json::from_str::<ServerFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("[skiff-link] unparseable server frame: {}", e);
            return;
        },
    };

    match frame {
        ServerFrame::Message { topic, payload } => route_message(feeds, &topic, &payload),
        ServerFrame::Error { code, message } => {
            log::warn!("[skiff-link] bus reported error [{}]: {}", code, message);
            events.emit_error(TransportError::new(code, message));
        },
        ServerFrame::Welcome { .. } | ServerFrame::AuthOk | ServerFrame::AuthError { .. } => {
            log::warn!("[skiff-link] unexpected handshake frame after authentication");
        },
    }
}

/// Push one inbound payload into the topic's feed.
///
/// A full feed drops the payload (reject-new) so a slow handler can never
/// stall the read loop; a closed feed means the delivery task is gone and
/// the payload is silently discarded until the client detaches the topic.
fn route_message(feeds: &mut HashMap<String, FeedSlot>, topic: &str, payload: &str) {
    let Some(slot) = feeds.get_mut(topic) else {
        log::debug!("[skiff-link] message for unsubscribed topic '{}'", topic);
        return;
    };

    let bytes = match frames::decode_payload(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!(
                "[skiff-link] undecodable payload on topic '{}': {}",
                topic,
                e
            );
            return;
        },
    };

    match slot.feed.try_send(bytes) {
        Ok(()) => {},
        Err(mpsc::error::TrySendError::Full(_)) => {
            slot.dropped += 1;
            log::warn!(
                "[skiff-link] feed full for topic '{}', dropping message ({} dropped so far)",
                topic,
                slot.dropped
            );
        },
        Err(mpsc::error::TrySendError::Closed(_)) => {
            log::debug!("[skiff-link] feed for topic '{}' is closed", topic);
        },
    }
}
