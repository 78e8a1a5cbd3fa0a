//! Transport layer.
//!
//! This module carries frames between the client and the broker.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      Link       ┌──────────────────┐     WebSocket     ┌─────────┐
//! │  Session        │◄───────────────►│  Connector pump  │◄─────────────────►│  Broker │
//! │  (STOMP, beats) │  text channels  │  (tungstenite)   │                   │         │
//! └─────────────────┘                 └──────────────────┘                   └─────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Session::spawn` - Opens a link through the [`Connector`]
//! 2. CONNECT / CONNECTED negotiation, bounded by the connect timeout
//! 3. Event loop - frames out, MESSAGE / ERROR in, heart-beats both ways
//! 4. `Session::shutdown` (or drop) - DISCONNECT, then close
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `link` | Connector trait and link channels |
//! | `memory` | In-memory connector and broker peer |
//! | `session` | STOMP session task |
//! | `websocket` | WebSocket connector |

// ============================================================================
// Submodules
// ============================================================================

/// Connector trait and link channels.
pub mod link;

/// In-memory connector for tests.
pub mod memory;

/// STOMP session lifecycle.
pub mod session;

/// WebSocket connector.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use link::{CloseInfo, Connector, Link, LinkEvent, Outbound};
pub use memory::{MemoryBroker, MemoryConnector, MemoryPeer};
pub use session::{ConnectedInfo, Session, SessionState};
pub use websocket::WebSocketConnector;
