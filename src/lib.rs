//! Crowdfund Live - real-time campaign messaging client.
//!
//! This library keeps a STOMP-over-WebSocket connection to the platform's
//! message broker and delivers live campaign progress and pledge outcomes to
//! subscriber callbacks.
//!
//! # Architecture
//!
//! The client is layered:
//!
//! - **Transport**: one [`Session`](transport::Session) per connection attempt,
//!   carrying STOMP frames over a [`Connector`]
//! - **Registry**: one wire subscription per destination, fanned out to any
//!   number of callbacks
//! - **Coordinator**: reconnects on credential rotation and transport loss,
//!   then replays every subscription onto the new session
//!
//! Key design principles:
//!
//! - Subscribers never resubscribe: handles and callbacks survive reconnects
//! - The bearer token is read at each connect, never cached
//! - Failures after `connect()` surface through hooks, not return values
//! - Delivery is at-most-once across reconnects
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use crowdfund_live::{Callback, ClientConfig, Destination, LiveClient, Result, TokenStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfig::builder()
//!         .endpoint("ws://localhost:8080/ws")
//!         .build()?;
//!
//!     // Shared with the HTTP layer, which calls `set_token` on refresh
//!     let tokens = TokenStore::new(Some("access-token".into()));
//!
//!     let client = LiveClient::websocket(config, Arc::new(tokens.clone()))?;
//!     client.attach_rotation(&tokens);
//!     client.on_error(|e| eprintln!("live error [{}]: {e}", e.code()));
//!     client.connect();
//!
//!     client.subscribe(
//!         Destination::campaign_progress("C1"),
//!         Callback::new(|payload| println!("progress: {payload:?}")),
//!     );
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`LiveClient`], [`Callback`], [`Publisher`] |
//! | [`config`] | [`ClientConfig`] and its builder |
//! | [`credentials`] | Token sources and rotation notifications |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Destinations and subscription handles |
//! | [`protocol`] | STOMP frames, heart-beats, payloads |
//! | [`transport`] | Connectors and sessions |

// ============================================================================
// Modules
// ============================================================================

/// Messaging client.
///
/// - [`LiveClient`] - Connection, subscriptions, rotation
/// - [`Publisher`] - Send-only handle
pub mod client;

/// Client configuration.
///
/// Use [`ClientConfig::builder()`] to create a validated configuration.
pub mod config;

/// Credential sources and rotation notifications.
pub mod credentials;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Destinations, wire ids and subscription handles.
pub mod identifiers;

/// STOMP frame types.
pub mod protocol;

/// Broker transport.
///
/// WebSocket and in-memory connectors, and the session task.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Callback, CloseHook, ConnectHook, ErrorHook, LiveClient, Publisher};

// Config types
pub use config::{ClientConfig, ClientConfigBuilder, ReconnectPolicy};

// Credential types
pub use credentials::{
    Anonymous, CredentialStore, RotationHandler, RotationNotifier, StaticToken, TokenStore,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Destination, SubscriptionHandle, WireId};

// Protocol types
pub use protocol::{HeartBeat, Payload};

// Transport types
pub use transport::{
    CloseInfo, ConnectedInfo, Connector, MemoryBroker, MemoryConnector, SessionState,
    WebSocketConnector,
};
