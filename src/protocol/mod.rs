//! Wire protocol types.
//!
//! The broker speaks STOMP over WebSocket text messages. Bodies are JSON.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `CONNECT` | Client → Broker | Version and heart-beat negotiation, bearer token |
//! | `CONNECTED` | Broker → Client | Session accepted |
//! | `SUBSCRIBE` / `UNSUBSCRIBE` | Client → Broker | Wire subscription lifecycle |
//! | `SEND` | Client → Broker | Publish a command |
//! | `MESSAGE` | Broker → Client | Delivery for a wire subscription |
//! | `ERROR` | Broker → Client | Rejection or fatal session error |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame codec |
//! | `heartbeat` | Heart-beat negotiation |
//! | `payload` | Decoded-or-raw message content |

// ============================================================================
// Submodules
// ============================================================================

/// Frame encoding and decoding.
pub mod frame;

/// Heart-beat negotiation.
pub mod heartbeat;

/// Inbound message content.
pub mod payload;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{ACCEPT_VERSION, Frame, FrameCommand};
pub use heartbeat::{HeartBeat, Negotiated};
pub use payload::Payload;
