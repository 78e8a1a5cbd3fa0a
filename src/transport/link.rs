//! Byte-carrying seam between the session and a concrete transport.
//!
//! A [`Connector`] opens a [`Link`]: a pair of channels carrying text
//! messages out and [`LinkEvent`]s in. The session never sees sockets,
//! which lets tests drive it with an in-memory peer.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Close code used when the peer vanished without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code used when the broker stopped sending heart-beats.
pub const HEARTBEAT_TIMEOUT: u16 = 4000;

// ============================================================================
// CloseInfo
// ============================================================================

/// Why a transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code (WebSocket semantics).
    pub code: u16,
    /// Human-readable reason, possibly empty.
    pub reason: String,
    /// `true` if a close handshake completed.
    pub clean: bool,
}

impl CloseInfo {
    /// Close after a completed close handshake.
    #[inline]
    #[must_use]
    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            clean: true,
        }
    }

    /// Close without a close handshake.
    #[inline]
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
            clean: false,
        }
    }
}

// ============================================================================
// Link
// ============================================================================

/// Message from the session to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text message to write.
    Text(String),
    /// Close the transport.
    Close,
}

/// Message from the transport to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Text message received.
    Text(String),
    /// Transport closed. Nothing follows.
    Closed(CloseInfo),
}

/// An open transport.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Link {
    /// Wraps the two halves of an open transport.
    #[inline]
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Queues a text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the transport is gone.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.outbound
            .send(Outbound::Text(text.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Asks the transport to close.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Receives the next event. `None` once the transport task is gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.inbound.recv().await
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens links to the broker endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a transport to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the transport cannot be established.
    async fn open(&self, endpoint: &Url) -> Result<Link>;
}

// ============================================================================
// Tests
// ============================================================================
