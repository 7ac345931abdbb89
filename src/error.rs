//! Error types for skiff-link.
//!
//! Each client operation has its own error enum so callers can match on
//! exactly the failures that operation can produce. Transport-sourced
//! variants carry a [`TransportError`] with the machine-readable
//! [`ErrorCode`] and the human-readable message reported by the bus.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable error codes reported by the bus transport.
///
/// These are the codes that travel on the wire (serialized as
/// `SCREAMING_SNAKE_CASE` strings) and that surface inside
/// [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The bus rejected the presented credentials.
    AuthRejected,
    /// The credential material itself was malformed.
    BadCredentials,
    /// The bus endpoint refused or never accepted the connection.
    ConnectionRefused,
    /// An established connection was lost.
    ConnectionLost,
    /// An operation did not complete within its configured timeout.
    Timeout,
    /// A frame violated the wire protocol.
    Protocol,
    /// Unclassified transport failure.
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthRejected => "AUTH_REJECTED",
            ErrorCode::BadCredentials => "BAD_CREDENTIALS",
            ErrorCode::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured error reported by the bus transport: a machine code plus the
/// message the transport produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct TransportError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable message sourced from the transport.
    pub message: String,
}

impl TransportError {
    /// Create a new transport error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionLost, message)
    }

    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Protocol, message)
    }
}

/// Errors from [`SkiffClientBuilder::build`](crate::SkiffClientBuilder::build).
///
/// Construction performs no I/O, so these are purely configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server_url is required")]
    MissingServerUrl,

    #[error("invalid server_url '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error("queue_capacity must be at least 1")]
    InvalidQueueCapacity,
}

/// Errors from [`SkiffClient::connect`](crate::SkiffClient::connect).
#[derive(Debug, Error)]
pub enum ConnectError {
    /// A connection is already established (or being established).
    /// Call [`close`](crate::SkiffClient::close) first to reconnect.
    #[error("already connected to the bus")]
    AlreadyConnected,

    /// The bus rejected the presented credentials.
    #[error("authentication rejected: {0}")]
    Authentication(TransportError),

    /// The bus endpoint could not be reached.
    #[error("bus unreachable: {0}")]
    Unreachable(TransportError),

    /// The connection handshake failed after the endpoint was reached.
    #[error("connection handshake failed: {0}")]
    Handshake(TransportError),
}

impl ConnectError {
    /// The structured transport error, for variants that carry one.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            ConnectError::AlreadyConnected => None,
            ConnectError::Authentication(e)
            | ConnectError::Unreachable(e)
            | ConnectError::Handshake(e) => Some(e),
        }
    }
}

/// Errors from [`SkiffClient::publish`](crate::SkiffClient::publish).
#[derive(Debug, Error)]
pub enum PublishError {
    /// No live connection; call [`connect`](crate::SkiffClient::connect) first.
    #[error("not connected to the bus")]
    NotConnected,

    /// The transport failed to hand the frame to the bus.
    #[error("publish failed: {0}")]
    Transport(TransportError),
}

/// Errors from subscription management
/// ([`subscribe`](crate::SkiffClient::subscribe),
/// [`unsubscribe`](crate::SkiffClient::unsubscribe),
/// [`unsubscribe_all`](crate::SkiffClient::unsubscribe_all)).
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// No live connection; call [`connect`](crate::SkiffClient::connect) first.
    #[error("not connected to the bus")]
    NotConnected,

    /// The transport failed to register or retire the subscription.
    #[error("subscription update failed: {0}")]
    Transport(TransportError),
}

/// Errors from [`decode`](crate::codec::decode): the payload is not valid
/// text in the bus encoding (UTF-8).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },
}

/// Errors from [`SkiffClient::close`](crate::SkiffClient::close).
///
/// Teardown always completes locally: even when the drain fails the
/// subscriptions are retired and the connection handle is cleared.
#[derive(Debug, Error)]
pub enum CloseError {
    #[error("connection drain failed: {0}")]
    Drain(TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::AuthRejected.as_str(), "AUTH_REJECTED");
        assert_eq!(ErrorCode::ConnectionLost.as_str(), "CONNECTION_LOST");
        assert_eq!(ErrorCode::Protocol.as_str(), "PROTOCOL");
    }

    #[test]
    fn test_error_code_wire_format() {
        // Codes travel on the wire as SCREAMING_SNAKE_CASE strings.
        let json = serde_json::to_string(&ErrorCode::AuthRejected).unwrap();
        assert_eq!(json, "\"AUTH_REJECTED\"");
        let back: ErrorCode = serde_json::from_str("\"TIMEOUT\"").unwrap();
        assert_eq!(back, ErrorCode::Timeout);
    }

    #[test]
    fn test_transport_error_display_carries_code_and_message() {
        let err = TransportError::new(ErrorCode::AuthRejected, "key not authorized");
        assert_eq!(err.to_string(), "[AUTH_REJECTED] key not authorized");
    }

    #[test]
    fn test_operation_errors_display() {
        let err = PublishError::NotConnected;
        assert_eq!(err.to_string(), "not connected to the bus");

        let err = ConnectError::Authentication(TransportError::new(
            ErrorCode::BadCredentials,
            "seed too short",
        ));
        assert!(err.to_string().contains("BAD_CREDENTIALS"));
    }
}
