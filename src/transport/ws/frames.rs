//! Wire frames for the Skiff WebSocket protocol.
//!
//! Every frame is a JSON object tagged by `type`; payloads travel base64
//! encoded so arbitrary bytes survive the text frame. The handshake is
//! challenge-response: the server opens with `welcome` carrying a nonce,
//! the client answers with `auth` carrying its public key and the nonce's
//! signature, and the server settles it with `auth_ok` or `auth_error`.

use crate::error::ErrorCode;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Client-to-server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientFrame {
    /// Answer the server's `welcome` challenge.
    Auth {
        /// Base64 Ed25519 public key.
        public_key: String,
        /// Base64 signature over the raw nonce bytes.
        signature: String,
    },

    /// Publish a payload on a topic.
    Publish {
        topic: String,
        /// Base64 payload bytes.
        payload: String,
    },

    /// Start receiving messages for a topic.
    Subscribe { topic: String },

    /// Stop receiving messages for a topic.
    Unsubscribe { topic: String },
}

/// Server-to-client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerFrame {
    /// First frame after the socket opens; carries the auth challenge.
    Welcome {
        /// Base64 nonce the client must sign.
        nonce: String,
    },

    /// The `auth` answer was accepted.
    AuthOk,

    /// The `auth` answer was rejected; the server closes after sending this.
    AuthError { code: ErrorCode, message: String },

    /// A payload delivered on a subscribed topic.
    Message {
        topic: String,
        /// Base64 payload bytes.
        payload: String,
    },

    /// Operational error that does not end the connection.
    Error { code: ErrorCode, message: String },
}

/// Encode payload bytes for a frame.
pub(crate) fn encode_payload(payload: &[u8]) -> String {
    general_purpose::STANDARD.encode(payload)
}

/// Decode a frame's base64 payload field.
pub(crate) fn decode_payload(payload: &str) -> Result<Bytes, base64::DecodeError> {
    general_purpose::STANDARD.decode(payload).map(Bytes::from)
}
