//! Minimal in-test Skiff bus speaking the WebSocket wire protocol.
//!
//! Implements just enough of the server side to exercise the client
//! end-to-end over real sockets: the `welcome`/`auth` handshake with
//! Ed25519 signature verification, topic subscription sets per connection,
//! and fan-out of `publish` frames to every subscribed connection.
//!
//! Frames are built and parsed with raw `serde_json` values on purpose, so
//! these tests check the client's wire format against an independent
//! rendering of the protocol.

use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

/// A running test bus bound to an ephemeral localhost port.
pub struct TestBus {
    addr: SocketAddr,
    state: Arc<BusState>,
    accept_task: JoinHandle<()>,
}

struct BusState {
    /// `None` accepts any key with a valid signature.
    allowed_keys: Option<HashSet<String>>,
    conns: Mutex<HashMap<u64, ConnEntry>>,
    next_conn_id: AtomicU64,
    /// Every publish frame the bus accepted, as (topic, decoded text).
    published: Mutex<Vec<(String, String)>>,
}

struct ConnEntry {
    topics: HashSet<String>,
    out_tx: mpsc::UnboundedSender<Message>,
}

impl TestBus {
    /// Start a bus that accepts any correctly signed auth frame.
    pub async fn spawn() -> Self {
        Self::start(None).await
    }

    /// Start a bus that additionally requires the public key to be in
    /// `keys` (base64, as produced by `CredentialSeed::public_key`).
    pub async fn spawn_with_allowed_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self::start(Some(keys.into_iter().collect())).await
    }

    async fn start(allowed_keys: Option<HashSet<String>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("test bus should bind an ephemeral port");
        let addr = listener.local_addr().expect("listener has a local addr");

        let state = Arc::new(BusState {
            allowed_keys,
            conns: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            published: Mutex::new(Vec::new()),
        });

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        tokio::spawn(serve_connection(stream, accept_state.clone()));
                    },
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// `ws://` URL of this bus.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of authenticated connections currently open.
    pub fn connection_count(&self) -> usize {
        self.state.conns.lock().unwrap().len()
    }

    /// Whether any connection is currently subscribed to `topic`.
    pub fn has_subscription(&self, topic: &str) -> bool {
        self.state
            .conns
            .lock()
            .unwrap()
            .values()
            .any(|entry| entry.topics.contains(topic))
    }

    /// All publish frames received so far, as (topic, decoded text).
    pub fn published(&self) -> Vec<(String, String)> {
        self.state.published.lock().unwrap().clone()
    }

    /// Close every open connection from the server side.
    pub fn disconnect_all(&self) {
        for entry in self.state.conns.lock().unwrap().values() {
            let _ = entry.out_tx.send(Message::Close(None));
        }
    }
}

impl Drop for TestBus {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(stream: TcpStream, state: Arc<BusState>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut write, mut read) = ws.split();

    // Challenge: random nonce the client must sign.
    let nonce: [u8; 32] = rand::random();
    let welcome = json!({
        "type": "welcome",
        "nonce": general_purpose::STANDARD.encode(nonce),
    });
    if write
        .send(Message::Text(welcome.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    // Wait for the auth frame and verdict.
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if frame["type"] != "auth" {
                    continue;
                }
                let public_key = frame["public_key"].as_str().unwrap_or_default();
                let signature = frame["signature"].as_str().unwrap_or_default();
                if verify_auth(&state, public_key, signature, &nonce) {
                    break;
                }
                let rejected = json!({
                    "type": "auth_error",
                    "code": "AUTH_REJECTED",
                    "message": "public key is not authorized",
                });
                let _ = write.send(Message::Text(rejected.to_string().into())).await;
                let _ = write.close().await;
                return;
            },
            Some(Ok(Message::Ping(payload))) => {
                let _ = write.send(Message::Pong(payload)).await;
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => continue,
        }
    }

    // Register before the verdict goes out, so a client that has seen
    // `auth_ok` is already counted.
    let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    state.conns.lock().unwrap().insert(
        conn_id,
        ConnEntry {
            topics: HashSet::new(),
            out_tx: out_tx.clone(),
        },
    );

    let ok = json!({"type": "auth_ok"});
    if write.send(Message::Text(ok.to_string().into())).await.is_err() {
        state.conns.lock().unwrap().remove(&conn_id);
        return;
    }

    // Single writer: everything outbound goes through the channel.
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if write.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_frame(&state, conn_id, &text),
            Ok(Message::Ping(payload)) => {
                let _ = out_tx.send(Message::Pong(payload));
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {},
        }
    }

    state.conns.lock().unwrap().remove(&conn_id);
    writer.abort();
}

fn handle_frame(state: &BusState, conn_id: u64, text: &str) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return,
    };
    match frame["type"].as_str() {
        Some("publish") => {
            let topic = frame["topic"].as_str().unwrap_or_default().to_string();
            let payload = frame["payload"].as_str().unwrap_or_default().to_string();
            let decoded = general_purpose::STANDARD
                .decode(&payload)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            state
                .published
                .lock()
                .unwrap()
                .push((topic.clone(), decoded));

            let delivery = json!({
                "type": "message",
                "topic": topic,
                "payload": payload,
            })
            .to_string();
            for entry in state.conns.lock().unwrap().values() {
                if entry.topics.contains(&topic) {
                    let _ = entry.out_tx.send(Message::Text(delivery.clone().into()));
                }
            }
        },
        Some("subscribe") => {
            if let Some(topic) = frame["topic"].as_str() {
                if let Some(entry) = state.conns.lock().unwrap().get_mut(&conn_id) {
                    entry.topics.insert(topic.to_string());
                }
            }
        },
        Some("unsubscribe") => {
            if let Some(topic) = frame["topic"].as_str() {
                if let Some(entry) = state.conns.lock().unwrap().get_mut(&conn_id) {
                    entry.topics.remove(topic);
                }
            }
        },
        _ => {},
    }
}

fn verify_auth(state: &BusState, public_key: &str, signature: &str, nonce: &[u8]) -> bool {
    if let Some(allowed) = &state.allowed_keys {
        if !allowed.contains(public_key) {
            return false;
        }
    }

    let Ok(key_bytes) = general_purpose::STANDARD.decode(public_key) else {
        return false;
    };
    let Ok(key_array) = <[u8; 32]>::try_from(key_bytes) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_array) else {
        return false;
    };
    let Ok(sig_bytes) = general_purpose::STANDARD.decode(signature) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(nonce, &sig).is_ok()
}
