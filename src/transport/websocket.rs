//! WebSocket transport.
//!
//! Opens a client connection with `tokio-tungstenite` and spawns a pump task
//! that moves text messages between the socket and the [`Link`] channels.
//!
//! # Pump Loop
//!
//! - Socket text (and UTF-8 binary) messages become [`LinkEvent::Text`]
//! - Socket close, error or end of stream becomes one [`LinkEvent::Closed`]
//! - [`Outbound::Text`] is written to the socket
//! - [`Outbound::Close`] or a dropped link closes the socket silently

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::link::{CloseInfo, Connector, Link, LinkEvent, Outbound};

// ============================================================================
// Types
// ============================================================================

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the broker closes without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

// ============================================================================
// WebSocketConnector
// ============================================================================

/// Production connector over WebSocket.
///
/// `wss://` endpoints need the `tls` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Creates a connector.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Url) -> Result<Link> {
        let (socket, response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| Error::connection(format!("WebSocket connect failed: {e}")))?;

        debug!(endpoint = %endpoint, status = %response.status(), "WebSocket connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_pump(socket, outbound_rx, inbound_tx));

        Ok(Link::new(outbound_tx, inbound_rx))
    }
}

// ============================================================================
// Pump
// ============================================================================

/// Moves messages between socket and link until either side closes.
async fn run_pump(
    socket: Socket,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    inbound_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut ws_write, mut ws_read) = socket.split();

    let closed = loop {
        tokio::select! {
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(LinkEvent::Text(text.as_str().to_owned())).is_err() {
                            let _ = ws_write.close().await;
                            break None;
                        }
                    }

                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            if inbound_tx.send(LinkEvent::Text(text)).is_err() {
                                let _ = ws_write.close().await;
                                break None;
                            }
                        }
                        Err(_) => warn!(len = bytes.len(), "Dropping non-UTF-8 binary message"),
                    },

                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "WebSocket closed by remote");
                        break Some(match frame {
                            Some(frame) => CloseInfo::clean(u16::from(frame.code), frame.reason.as_str()),
                            None => CloseInfo::clean(NO_STATUS_RECEIVED, ""),
                        });
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break Some(CloseInfo::abnormal(e.to_string()));
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break Some(CloseInfo::abnormal("stream ended"));
                    }

                    // Ping, Pong, raw frames
                    _ => {}
                }
            }

            command = outbound_rx.recv() => {
                match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            warn!(error = %e, "WebSocket write failed");
                            break Some(CloseInfo::abnormal(e.to_string()));
                        }
                        trace!("Message written");
                    }

                    Some(Outbound::Close) | None => {
                        debug!("Closing WebSocket");
                        let _ = ws_write.close().await;
                        break None;
                    }
                }
            }
        }
    };

    if let Some(info) = closed {
        let _ = inbound_tx.send(LinkEvent::Closed(info));
    }

    debug!("WebSocket pump terminated");
}

// ============================================================================
// Tests
// ============================================================================
