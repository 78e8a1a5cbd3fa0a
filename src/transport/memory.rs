//! In-memory transport.
//!
//! [`MemoryConnector`] hands every opened link to a [`MemoryBroker`], whose
//! [`MemoryPeer`]s play the broker side frame by frame. Used by the crate's
//! tests and available to applications testing their own subscribers.
//!
//! ```ignore
//! let (connector, mut broker) = MemoryConnector::pair();
//! let client = LiveClient::new(config, credentials, Arc::new(connector))?;
//! client.connect();
//!
//! let mut peer = broker.accept().await.unwrap();
//! peer.handshake().await;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{Destination, WireId};
use crate::protocol::{Frame, FrameCommand};

use super::link::{CloseInfo, Connector, Link, LinkEvent, Outbound};

// ============================================================================
// MemoryConnector
// ============================================================================

/// Connector whose links terminate in a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Creates a connector and the broker end that receives its links.
    #[must_use]
    pub fn pair() -> (Self, MemoryBroker) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicBool::new(false));
        let opened = Arc::new(AtomicUsize::new(0));

        let connector = Self {
            peers: peers_tx,
            refuse: Arc::clone(&refuse),
            opened: Arc::clone(&opened),
        };
        let broker = MemoryBroker {
            peers: peers_rx,
            refuse,
            opened,
        };

        (connector, broker)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &Url) -> Result<Link> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::connection(format!("{endpoint} refused connection")));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            from_client: outbound_rx,
            to_client: inbound_tx,
        };
        self.peers
            .send(peer)
            .map_err(|_| Error::connection("memory broker dropped"))?;

        let count = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(endpoint = %endpoint, count, "Memory link opened");

        Ok(Link::new(outbound_tx, inbound_rx))
    }
}

// ============================================================================
// MemoryBroker
// ============================================================================

/// Broker end of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryBroker {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    refuse: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
}

impl MemoryBroker {
    /// Waits for the next link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Returns a link that is already waiting, without blocking.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }

    /// Makes subsequent opens fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of links opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Broker side of one link.
#[derive(Debug)]
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<Outbound>,
    to_client: mpsc::UnboundedSender<LinkEvent>,
}

impl MemoryPeer {
    /// Next frame from the client, skipping heart-beats.
    ///
    /// `None` once the client closed the link.
    ///
    /// # Panics
    ///
    /// Panics if the client wrote something that does not decode.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.from_client.recv().await? {
                Outbound::Text(text) => {
                    if let Some(frame) = Frame::decode(&text).expect("client wrote a bad frame") {
                        return Some(frame);
                    }
                }
                Outbound::Close => return None,
            }
        }
    }

    /// Frame already written by the client, without blocking.
    ///
    /// # Panics
    ///
    /// Panics if the client wrote something that does not decode.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        while let Ok(outbound) = self.from_client.try_recv() {
            match outbound {
                Outbound::Text(text) => {
                    if let Some(frame) = Frame::decode(&text).expect("client wrote a bad frame") {
                        return Some(frame);
                    }
                }
                Outbound::Close => return None,
            }
        }
        None
    }

    /// Reads CONNECT and accepts it with heart-beats disabled.
    ///
    /// Returns the CONNECT frame for inspection.
    pub async fn handshake(&mut self) -> Option<Frame> {
        let connect = self.next_frame().await?;
        self.send_frame(
            &Frame::new(FrameCommand::Connected)
                .with_header("version", "1.2")
                .with_header("server", "memory-broker/1.0")
                .with_header("heart-beat", "0,0"),
        );
        Some(connect)
    }

    /// Reads CONNECT and rejects it with an ERROR frame.
    pub async fn reject(&mut self, message: &str) -> Option<Frame> {
        let connect = self.next_frame().await?;
        self.send_frame(&Frame::new(FrameCommand::Error).with_header("message", message));
        Some(connect)
    }

    /// Writes a frame to the client.
    pub fn send_frame(&self, frame: &Frame) {
        self.send_text(frame.encode());
    }

    /// Writes raw text to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(LinkEvent::Text(text.into()));
    }

    /// Delivers a MESSAGE for a wire subscription.
    pub fn message(&self, subscription: &str, destination: &Destination, body: &str) {
        self.send_frame(
            &Frame::new(FrameCommand::Message)
                .with_header("subscription", subscription)
                .with_header("destination", destination.as_str())
                .with_header("message-id", WireId::next().to_string())
                .with_body(body),
        );
    }

    /// Closes the link from the broker side.
    pub fn close(self, info: CloseInfo) {
        let _ = self.to_client.send(LinkEvent::Closed(info));
    }
}

// ============================================================================
// Tests
// ============================================================================
