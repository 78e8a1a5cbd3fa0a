//! Live client handle and its public surface.
//!
//! A [`LiveClient`] owns at most one [`Session`] at a time, the
//! subscription registry of that session, and the Pending Set that carries
//! subscriptions across sessions.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use crowdfund_live::{Callback, ClientConfig, Destination, LiveClient, TokenStore};
//!
//! # async fn example() -> crowdfund_live::Result<()> {
//! let config = ClientConfig::builder()
//!     .endpoint("ws://localhost:8080/ws")
//!     .build()?;
//! let tokens = TokenStore::anonymous();
//!
//! let client = LiveClient::websocket(config, Arc::new(tokens.clone()))?;
//! client.attach_rotation(&tokens);
//! client.connect();
//!
//! client.subscribe(
//!     Destination::campaign_progress("C1"),
//!     Callback::new(|payload| println!("progress: {payload:?}")),
//! );
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::credentials::{CredentialStore, RotationNotifier};
use crate::error::{Error, Result};
use crate::identifiers::{Destination, SubscriptionHandle};
use crate::protocol::{Frame, Payload};
use crate::transport::{
    CloseInfo, ConnectedInfo, Connector, Session, SessionState, WebSocketConnector,
};

use super::callback::Callback;
use super::hooks::{CloseHook, ConnectHook, ErrorHook, Hooks};
use super::pending::PendingSet;
use super::publisher::Publisher;
use super::registry::{FrameSink, Registry};

// ============================================================================
// Types
// ============================================================================

/// Why the client is between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cycle {
    /// Credential rotation: settle, reconnect once.
    Rotation,
    /// Transport loss: reconnect with backoff.
    Recovery,
}

/// Mutable client state, guarded by one lock.
#[derive(Debug, Default)]
pub(crate) struct ClientState {
    /// Lifecycle phase.
    pub(crate) phase: SessionState,
    /// Bumped by every session start, rotation and hard disconnect.
    pub(crate) generation: u64,
    /// Current session, if any.
    pub(crate) session: Option<Session>,
    /// Subscriptions of the current session.
    pub(crate) registry: Registry,
    /// Subscriptions waiting for the next connected session.
    pub(crate) pending: PendingSet,
    /// Set while a rotation cycle is in flight.
    pub(crate) rotating: bool,
    /// Cycle in flight, if any.
    pub(crate) cycle: Option<Cycle>,
    /// Recovery attempts since the last successful handshake.
    pub(crate) recovery_attempt: u32,
}

/// Shared client internals.
pub(crate) struct ClientInner {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) connector: Arc<dyn Connector>,
    /// Runtime timers and sessions are spawned on.
    pub(crate) runtime: Handle,
    pub(crate) state: Mutex<ClientState>,
    pub(crate) hooks: Hooks,
    /// Weak self-reference handed to session sinks and timers.
    pub(crate) this: Weak<ClientInner>,
}

// ============================================================================
// LiveClient
// ============================================================================

/// Real-time messaging client.
///
/// Cheap to clone; clones share one connection. The session shuts down when
/// the last clone is dropped.
#[derive(Clone)]
pub struct LiveClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LiveClient")
            .field("endpoint", &self.inner.config.endpoint().as_str())
            .field("phase", &state.phase)
            .field("generation", &state.generation)
            .field("subscriptions", &state.registry.wire_count())
            .field("pending", &state.pending.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// LiveClient - Constructors
// ============================================================================

impl LiveClient {
    /// Creates a client over an arbitrary connector.
    ///
    /// Nothing is opened until [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when called outside a tokio runtime.
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::config("LiveClient must be created inside a tokio runtime"))?;

        let inner = Arc::new_cyclic(|this| ClientInner {
            config: Arc::new(config),
            credentials,
            connector,
            runtime,
            state: Mutex::new(ClientState::default()),
            hooks: Hooks::default(),
            this: this.clone(),
        });

        debug!(endpoint = %inner.config.endpoint(), "Live client created");
        Ok(Self { inner })
    }

    /// Creates a client that connects over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when called outside a tokio runtime.
    pub fn websocket(config: ClientConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        Self::new(config, credentials, Arc::new(WebSocketConnector::new()))
    }
}

// ============================================================================
// LiveClient - Lifecycle
// ============================================================================

impl LiveClient {
    /// Opens a session with the token current at this moment.
    ///
    /// No-op unless disconnected. Failures are reported through
    /// [`on_error`](Self::on_error), never returned.
    pub fn connect(&self) {
        let mut state = self.inner.state.lock();

        if state.phase != SessionState::Disconnected {
            debug!(phase = %state.phase, "connect ignored");
            return;
        }

        state.recovery_attempt = 0;
        state.cycle = None;
        state.rotating = false;
        self.inner.start_session(&mut state);
    }

    /// Hard disconnect.
    ///
    /// Unsubscribes every wire subscription, closes the session and forgets
    /// all subscriptions, including those waiting for a reconnect. Any cycle
    /// in flight is abandoned. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let session = {
            let mut state = self.inner.state.lock();
            state.generation += 1;

            let session = state.session.take();
            state
                .registry
                .teardown(session.as_ref().map(|s| s as &dyn FrameSink));
            state.pending.clear();
            state.rotating = false;
            state.cycle = None;
            state.recovery_attempt = 0;

            let was = std::mem::replace(&mut state.phase, SessionState::Disconnected);
            if was != SessionState::Disconnected {
                info!(from = %was, generation = state.generation, "Disconnected");
            }
            session
        };

        if let Some(session) = session {
            session.shutdown();
        }
    }

    /// Returns `true` once the handshake has completed.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.lock().phase
    }
}

// ============================================================================
// LiveClient - Subscriptions
// ============================================================================

impl LiveClient {
    /// Subscribes `callback` to `destination`.
    ///
    /// While not connected the subscription is deferred and admitted when
    /// the next session connects; `None` is returned in that case. The same
    /// callback subscribed twice to one destination yields the same handle.
    pub fn subscribe(
        &self,
        destination: impl Into<Destination>,
        callback: Callback,
    ) -> Option<SubscriptionHandle> {
        let destination = destination.into();
        let mut state = self.inner.state.lock();
        let state = &mut *state;

        let Some(session) = state
            .session
            .as_ref()
            .filter(|_| state.phase == SessionState::Connected)
        else {
            debug!(%destination, phase = %state.phase, "Subscription deferred");
            state.pending.defer(destination, callback);
            return None;
        };

        // Still waiting for replay: keep the handle it was first issued with.
        let carried = state.pending.take_callback(&destination, &callback);
        let handle = carried.as_ref().and_then(|l| l.handle);

        match state
            .registry
            .admit(session, destination.clone(), callback.clone(), handle)
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(%destination, error = %e, "Subscribe failed, deferring");
                match carried {
                    Some(listener) => state.pending.restore(destination, vec![listener]),
                    None => state.pending.defer(destination, callback),
                }
                None
            }
        }
    }

    /// Removes the subscription behind `handle`.
    ///
    /// Other callbacks on the same destination keep receiving; the wire
    /// subscription goes away with the last one. Returns `false` for
    /// unknown handles.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut state = self.inner.state.lock();
        let state = &mut *state;

        let sink = state.session.as_ref().map(|s| s as &dyn FrameSink);
        let removed = state.registry.remove_handle(sink, handle) || state.pending.remove_handle(handle);

        if !removed {
            debug!(%handle, "Unknown subscription handle");
        }
        removed
    }

    /// Removes `callback` from `destination`, live or deferred.
    pub fn unsubscribe_callback(&self, destination: &Destination, callback: &Callback) -> bool {
        let mut state = self.inner.state.lock();
        let state = &mut *state;

        let sink = state.session.as_ref().map(|s| s as &dyn FrameSink);
        let live = state.registry.remove_callback(sink, destination, callback);
        let deferred = state.pending.remove_callback(destination, callback);
        live || deferred
    }

    /// Number of wire subscriptions on the current session.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().registry.wire_count()
    }

    /// Number of live callbacks on `destination`.
    #[must_use]
    pub fn callback_count(&self, destination: &Destination) -> usize {
        self.inner.state.lock().registry.callback_count(destination)
    }

    /// Number of subscriptions waiting for a connected session.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }
}

// ============================================================================
// LiveClient - Publishing
// ============================================================================

impl LiveClient {
    /// Publishes `body` as JSON to `destination`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless connected; nothing is queued
    /// - [`Error::Json`] if `body` does not serialize
    pub fn send<T>(&self, destination: &Destination, body: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_string(body)?;
        let state = self.inner.state.lock();

        match (&state.phase, &state.session) {
            (SessionState::Connected, Some(session)) => {
                session.send_frame(Frame::send(destination, json))?;
                debug!(%destination, "Message sent");
                Ok(())
            }
            _ => Err(Error::NotConnected),
        }
    }

    /// Publisher handle sharing this client.
    #[inline]
    #[must_use]
    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.clone())
    }
}

// ============================================================================
// LiveClient - Hooks & Rotation
// ============================================================================

impl LiveClient {
    /// Sets the hook invoked after every successful handshake.
    pub fn on_connect<F>(&self, hook: F)
    where
        F: Fn(&ConnectedInfo) + Send + Sync + 'static,
    {
        self.inner.hooks.set_connect(Arc::new(hook) as ConnectHook);
    }

    /// Sets the hook invoked on handshake failure and broker ERROR frames.
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.hooks.set_error(Arc::new(hook) as ErrorHook);
    }

    /// Sets the hook invoked when an established session closes on its own.
    ///
    /// Not invoked by [`disconnect`](Self::disconnect) or rotation.
    pub fn on_close<F>(&self, hook: F)
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.inner.hooks.set_close(Arc::new(hook) as CloseHook);
    }

    /// Reconnects with fresh credentials, preserving every subscription.
    ///
    /// Ignored unless connected or connecting. Overlapping calls collapse
    /// into one cycle. Callable from any thread.
    pub fn rotate_credentials(&self) {
        self.inner.rotate();
    }

    /// Rotates credentials whenever `notifier` reports a new token.
    ///
    /// The registration holds the client weakly and is dropped by the
    /// notifier on the first rotation after the client is gone.
    pub fn attach_rotation(&self, notifier: &dyn RotationNotifier) {
        let weak = Arc::downgrade(&self.inner);
        notifier.on_rotate(Arc::new(move |token| {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            debug!(authenticated = token.is_some(), "Rotation signal received");
            inner.rotate();
            true
        }));
    }
}

// ============================================================================
// ClientInner - Message Dispatch
// ============================================================================

impl ClientInner {
    /// Fans a MESSAGE out to its destination's callbacks.
    ///
    /// Callbacks run after the state lock is released.
    pub(crate) fn dispatch(&self, generation: u64, frame: &Frame) {
        let routed = {
            let state = self.state.lock();
            if state.generation != generation {
                debug!(generation, current = state.generation, "Dropping stale message");
                return;
            }
            state.registry.route(frame)
        };

        let Some((destination, callbacks)) = routed else {
            debug!(subscription = ?frame.header("subscription"), "Message for unknown subscription");
            return;
        };

        let payload = Payload::from_body(frame.body());
        if matches!(payload, Payload::Raw(_)) {
            debug!(%destination, "Delivering undecodable body as raw text");
        }

        for callback in &callbacks {
            callback.call(&payload);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::client::testing::{Harness, recorder, wait_until};
    use crate::protocol::FrameCommand;

    #[test]
    fn test_new_requires_runtime() {
        let config = ClientConfig::builder()
            .endpoint("ws://broker.test/ws")
            .build()
            .expect("config");
        let (connector, _broker) = crate::transport::MemoryConnector::pair();

        let err = LiveClient::new(config, Arc::new(crate::credentials::Anonymous), Arc::new(connector))
            .unwrap_err();
        assert_eq!(err.code(), "config");
    }

    #[tokio::test]
    async fn test_dropped_client_leaves_rotation_notifier() {
        let Harness { client, tokens, .. } = Harness::anonymous();
        let survivor = Harness::anonymous().client;
        survivor.attach_rotation(&tokens);
        assert_eq!(tokens.handler_count(), 2);

        drop(client);
        tokens.set_token(Some("fresh".into()));
        assert_eq!(tokens.handler_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let mut h = Harness::anonymous();
        h.client.connect();
        h.client.connect();
        assert_eq!(h.client.state(), SessionState::Connecting);

        let mut peer = h.broker.accept().await.expect("peer");
        peer.handshake().await.expect("CONNECT");
        wait_until(|| h.client.is_connected()).await;

        h.client.connect();
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(h.broker.opened(), 1);
        assert!(h.broker.try_accept().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_one_wire_subscription_per_destination() {
        let mut h = Harness::anonymous();
        let mut peer = h.connected().await;

        let d1 = Destination::campaign_progress("C1");
        let d2 = Destination::campaign_progress("C2");
        let (cb1, mut rx1) = recorder();
        let (cb2, mut rx2) = recorder();
        let (cb3, mut rx3) = recorder();
        let (other, mut rx_other) = recorder();

        let h1 = h.client.subscribe(d1.clone(), cb1).expect("handle");
        let h2 = h.client.subscribe(d1.clone(), cb2).expect("handle");
        let h3 = h.client.subscribe(d1.clone(), cb3).expect("handle");
        h.client.subscribe(d2.clone(), other).expect("handle");

        assert_eq!(h1.wire_id(), h2.wire_id());
        assert_eq!(h1.wire_id(), h3.wire_id());
        assert_eq!(h.client.subscription_count(), 2);
        assert_eq!(h.client.callback_count(&d1), 3);

        // Frames arrive in order, so the second frame being D2's SUBSCRIBE
        // proves D1 was subscribed only once.
        let first = peer.next_frame().await.expect("SUBSCRIBE");
        assert_eq!(first.destination(), Some(d1.clone()));
        let second = peer.next_frame().await.expect("SUBSCRIBE");
        assert_eq!(second.command(), FrameCommand::Subscribe);
        assert_eq!(second.destination(), Some(d2));

        let wire = first.header("id").expect("id").to_string();
        peer.message(&wire, &d1, r#"{"pledged":100}"#);

        let expected = Payload::Decoded(json!({"pledged": 100}));
        assert_eq!(rx1.recv().await, Some(expected.clone()));
        assert_eq!(rx2.recv().await, Some(expected.clone()));
        assert_eq!(rx3.recv().await, Some(expected));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx1.try_recv().is_err());
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_body_delivered_raw() {
        let mut h = Harness::anonymous();
        let mut peer = h.connected().await;

        let dest = Destination::user_error();
        let (cb, mut rx) = recorder();
        h.client.subscribe(dest.clone(), cb).expect("handle");

        let subscribe = peer.next_frame().await.expect("SUBSCRIBE");
        let wire = subscribe.header("id").expect("id").to_string();
        peer.message(&wire, &dest, "not json {");

        assert_eq!(rx.recv().await, Some(Payload::Raw("not json {".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_order_delivery() {
        let mut h = Harness::anonymous();
        let mut peer = h.connected().await;

        let dest = Destination::campaign_progress("C1");
        let (cb, mut rx) = recorder();
        h.client.subscribe(dest.clone(), cb).expect("handle");
        let wire = peer
            .next_frame()
            .await
            .and_then(|f| f.header("id").map(str::to_string))
            .expect("id");

        for n in 0..20 {
            peer.message(&wire, &dest, &format!(r#"{{"n":{n}}}"#));
        }
        for n in 0..20 {
            assert_eq!(rx.recv().await, Some(Payload::Decoded(json!({"n": n}))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_unsubscribe_keeps_wire_subscription() {
        let mut h = Harness::anonymous();
        let mut peer = h.connected().await;

        let dest = Destination::campaign_progress("C1");
        let (cb1, mut rx1) = recorder();
        let (cb2, mut rx2) = recorder();
        let h1 = h.client.subscribe(dest.clone(), cb1).expect("handle");
        let h2 = h.client.subscribe(dest.clone(), cb2).expect("handle");
        let wire = peer
            .next_frame()
            .await
            .and_then(|f| f.header("id").map(str::to_string))
            .expect("id");

        assert!(h.client.unsubscribe(h1));
        assert!(!h.client.unsubscribe(h1));

        // Marker: the next frame is our SEND, not an UNSUBSCRIBE.
        h.client.send(&Destination::new("/app/marker"), &json!({})).expect("send");
        assert_eq!(peer.next_frame().await.expect("frame").command(), FrameCommand::Send);

        peer.message(&wire, &dest, "1");
        assert_eq!(rx2.recv().await, Some(Payload::Decoded(json!(1))));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx1.try_recv().is_err());

        assert!(h.client.unsubscribe(h2));
        let unsubscribe = peer.next_frame().await.expect("UNSUBSCRIBE");
        assert_eq!(unsubscribe.command(), FrameCommand::Unsubscribe);
        assert_eq!(unsubscribe.header("id"), Some(wire.as_str()));
        assert_eq!(h.client.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_callback_live_and_deferred() {
        let mut h = Harness::anonymous();
        let dest = Destination::campaign_progress("C1");
        let (cb, _rx) = recorder();

        assert!(h.client.subscribe(dest.clone(), cb.clone()).is_none());
        assert!(h.client.unsubscribe_callback(&dest, &cb));
        assert_eq!(h.client.pending_count(), 0);

        let mut peer = h.connected().await;
        h.client.subscribe(dest.clone(), cb.clone()).expect("handle");
        assert_eq!(peer.next_frame().await.expect("frame").command(), FrameCommand::Subscribe);

        assert!(h.client.unsubscribe_callback(&dest, &cb));
        assert_eq!(peer.next_frame().await.expect("frame").command(), FrameCommand::Unsubscribe);
        assert!(!h.client.unsubscribe_callback(&dest, &cb));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connection() {
        let mut h = Harness::anonymous();
        let dest = Destination::new("/app/pledges");

        let err = h.client.send(&dest, &json!({"amount": 5})).unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        let mut peer = h.connected().await;
        h.client.send(&dest, &json!({"amount": 5})).expect("send");

        let frame = peer.next_frame().await.expect("SEND");
        assert_eq!(frame.command(), FrameCommand::Send);
        assert_eq!(frame.header("content-type"), Some("application/json"));
        assert_eq!(frame.body(), r#"{"amount":5}"#);

        h.client.disconnect();
        assert!(matches!(
            h.client.send(&dest, &json!({"amount": 5})),
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_subscription_admitted_on_connect() {
        let mut h = Harness::anonymous();
        let dest = Destination::campaign_progress("C9");
        let (cb, mut rx) = recorder();

        assert!(h.client.subscribe(dest.clone(), cb).is_none());
        assert_eq!(h.client.pending_count(), 1);

        let mut peer = h.connected().await;
        let subscribe = peer.next_frame().await.expect("SUBSCRIBE");
        assert_eq!(subscribe.destination(), Some(dest.clone()));
        wait_until(|| h.client.pending_count() == 0).await;

        let wire = subscribe.header("id").expect("id").to_string();
        peer.message(&wire, &dest, r#"{"pledged":1}"#);
        assert_eq!(rx.recv().await, Some(Payload::Decoded(json!({"pledged": 1}))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_twice_is_safe() {
        let mut h = Harness::anonymous();
        let mut peer = h.connected().await;
        h.client
            .subscribe(Destination::user_success(), recorder().0)
            .expect("handle");
        assert_eq!(peer.next_frame().await.expect("frame").command(), FrameCommand::Subscribe);

        h.client.disconnect();
        h.client.disconnect();

        assert_eq!(h.client.state(), SessionState::Disconnected);
        assert_eq!(h.client.pending_count(), 0);
        assert_eq!(h.client.subscription_count(), 0);

        assert_eq!(peer.next_frame().await.expect("frame").command(), FrameCommand::Unsubscribe);
        assert_eq!(peer.next_frame().await.expect("frame").command(), FrameCommand::Disconnect);
        assert!(peer.next_frame().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_may_reenter_client() {
        let mut h = Harness::anonymous();
        let mut peer = h.connected().await;

        let dest = Destination::campaign_progress("C1");
        let client = h.client.clone();
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
        let reentrant = Callback::new(move |_| {
            let _ = done_tx.send(client.subscription_count());
        });
        h.client.subscribe(dest.clone(), reentrant).expect("handle");

        let wire = peer
            .next_frame()
            .await
            .and_then(|f| f.header("id").map(str::to_string))
            .expect("id");
        peer.message(&wire, &dest, "{}");

        assert_eq!(done_rx.recv().await, Some(1));
    }
}
