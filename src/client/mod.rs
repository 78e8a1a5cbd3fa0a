//! Messaging client.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`LiveClient`] | Connection, subscriptions, rotation |
//! | [`Callback`] | Subscriber function with reference identity |
//! | [`Publisher`] | Send-only handle |
//!
//! # Subscription Lifecycle
//!
//! ```text
//! subscribe ──► connected? ──yes──► registry (one wire subscription per destination)
//!                   │                    │
//!                   no                   │ rotation / link lost
//!                   ▼                    ▼
//!              Pending Set ◄──────── snapshot
//!                   │
//!                   └── next CONNECTED ──► replay ──► registry
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Subscriber callbacks.
pub mod callback;

/// Client handle and public surface.
pub mod core;

/// Rotation, recovery and replay.
mod coordinator;

/// Lifecycle hook types.
pub mod hooks;

/// Deferred subscriptions.
mod pending;

/// Send-only handle.
pub mod publisher;

/// Destination to callback bookkeeping.
mod registry;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::LiveClient;
pub use callback::Callback;
pub use hooks::{CloseHook, ConnectHook, ErrorHook};
pub use publisher::Publisher;
