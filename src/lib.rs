//! # skiff-link: Skiff Message Bus Client
//!
//! Client library for the Skiff topic-based publish/subscribe message bus.
//! One process-shared client holds a single authenticated connection and
//! multiplexes any number of topic subscriptions over it.
//!
//! ## Features
//!
//! - **Single shared connection**: one authenticated connection per client,
//!   shared by every clone of the handle
//! - **Topic subscriptions**: a per-topic delivery task invokes your handler
//!   with each decoded message; slow or panicking handlers never affect
//!   other topics or the connection
//! - **Clean teardown**: `close()` retires every subscription and drains
//!   the connection before releasing it
//! - **Seed-derived identity**: connect authenticates by signing the
//!   server's nonce with an Ed25519 key derived from a secret seed, which
//!   is zeroized after use
//! - **Pluggable transport**: WebSocket by default, in-memory hub for
//!   tests and local development
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skiff_link::{CredentialSeed, SkiffClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SkiffClient::builder()
//!         .server_url("wss://bus.example.com/skiff")
//!         .build()?;
//!
//!     client
//!         .connect(CredentialSeed::new("SKIFF-SEED-7F3A9C"))
//!         .await?;
//!
//!     client
//!         .subscribe("prices", |text| println!("price update: {}", text))
//!         .await?;
//!     client.publish("prices", "42.5").await?;
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle events
//!
//! ```rust,no_run
//! use skiff_link::{EventHandlers, SkiffClient};
//!
//! # fn example() -> Result<(), skiff_link::ConfigError> {
//! let client = SkiffClient::builder()
//!     .server_url("wss://bus.example.com/skiff")
//!     .event_handlers(
//!         EventHandlers::new()
//!             .on_connect(|| log::info!("bus connected"))
//!             .on_disconnect(|reason| log::warn!("bus lost: {}", reason)),
//!     )
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod codec;
pub mod error;
pub mod event_handlers;
mod registry;
mod subscription;
pub mod timeouts;
pub mod transport;

// Re-export main types for convenience
pub use auth::CredentialSeed;
pub use client::{ConnectionState, SkiffClient, SkiffClientBuilder, DEFAULT_QUEUE_CAPACITY};
pub use error::{
    CloseError, ConfigError, ConnectError, DecodeError, ErrorCode, PublishError, SubscribeError,
    TransportError,
};
pub use event_handlers::{DisconnectReason, EventHandlers};
pub use timeouts::{SkiffTimeouts, SkiffTimeoutsBuilder};
pub use transport::memory::MemoryHub;
pub use transport::ws::WsConnector;
pub use transport::{BusConnector, BusTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
