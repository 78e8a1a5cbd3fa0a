//! Shared fixtures for client tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::credentials::TokenStore;
use crate::protocol::{HeartBeat, Payload};
use crate::transport::{CloseInfo, MemoryBroker, MemoryConnector, MemoryPeer};

use super::callback::Callback;
use super::core::LiveClient;

/// Client wired to an in-memory broker, rotating on `tokens`.
pub(crate) struct Harness {
    pub(crate) client: LiveClient,
    pub(crate) broker: MemoryBroker,
    pub(crate) tokens: TokenStore,
}

impl Harness {
    pub(crate) fn anonymous() -> Self {
        Self::build(TokenStore::anonymous(), ReconnectPolicy::default())
    }

    pub(crate) fn with_policy(policy: ReconnectPolicy) -> Self {
        Self::build(TokenStore::anonymous(), policy)
    }

    fn build(tokens: TokenStore, policy: ReconnectPolicy) -> Self {
        let config = ClientConfig::builder()
            .endpoint("ws://broker.test/ws")
            .heart_beat(HeartBeat::disabled())
            .connect_timeout(Duration::from_secs(5))
            .settle_delay(Duration::from_secs(2))
            .replay_delay(Duration::from_millis(250))
            .reconnect(policy)
            .build()
            .expect("valid config");

        let (connector, broker) = MemoryConnector::pair();
        let client = LiveClient::new(config, Arc::new(tokens.clone()), Arc::new(connector))
            .expect("inside runtime");
        client.attach_rotation(&tokens);

        Self {
            client,
            broker,
            tokens,
        }
    }

    /// Calls `connect` and returns the broker side before the handshake.
    pub(crate) async fn connect_and_accept(&mut self) -> MemoryPeer {
        self.client.connect();
        self.broker.accept().await.expect("peer")
    }

    /// Connects and completes the handshake.
    pub(crate) async fn connected(&mut self) -> MemoryPeer {
        let mut peer = self.connect_and_accept().await;
        peer.handshake().await.expect("CONNECT");
        wait_until(|| self.client.is_connected()).await;
        peer
    }

    /// Records the code of every error passed to the error hook.
    pub(crate) fn capture_errors(&self) -> Arc<Mutex<Vec<&'static str>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        self.client.on_error(move |e| sink.lock().push(e.code()));
        seen
    }

    /// Records every close passed to the close hook.
    pub(crate) fn capture_closes(&self) -> Arc<Mutex<Vec<CloseInfo>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        self.client.on_close(move |info| sink.lock().push(info.clone()));
        seen
    }
}

/// Callback forwarding every payload to a channel.
pub(crate) fn recorder() -> (Callback, mpsc::UnboundedReceiver<Payload>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = Callback::new(move |payload| {
        let _ = tx.send(payload.clone());
    });
    (callback, rx)
}

/// Polls `condition` every 10ms for up to 10s.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 10s");
}
