//! One broker session: open, negotiate, pump frames, heart-beat.
//!
//! A [`Session`] is a single connection attempt. It is spawned, runs its
//! handshake and event loop on a tokio task, and reports everything through
//! a [`SessionEvent`] sink tagged with the generation it was started under.
//! A session is never reused: reconnecting means spawning a new one.
//!
//! # Event Loop
//!
//! - Outbound frames from the client are written to the link in order
//! - MESSAGE and ERROR frames are reported to the sink
//! - Heart-beats are written at the negotiated interval
//! - Silence beyond twice the expected broker interval is a transport loss

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, sleep_until, timeout};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameCommand, HeartBeat, Negotiated};

use super::link::{CloseInfo, Connector, HEARTBEAT_TIMEOUT, Link, LinkEvent};

// ============================================================================
// Constants
// ============================================================================

/// Heart-beat frame body.
const HEARTBEAT: &str = "\n";

/// Grace factor applied to the broker's heart-beat interval.
const WATCHDOG_FACTOR: u32 = 2;

// ============================================================================
// Types
// ============================================================================

/// Receives session events.
pub(crate) type EventSink = Arc<dyn Fn(SessionEvent) + Send + Sync>;

// ============================================================================
// ConnectedInfo
// ============================================================================

/// What the broker agreed to in CONNECTED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedInfo {
    /// Negotiated protocol version.
    pub version: String,
    /// Broker `server` header, if sent.
    pub server: Option<String>,
    /// Effective heart-beat intervals.
    pub heart_beat: Negotiated,
}

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle phase of the client's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Disconnected,
    /// Session spawned, handshake in flight.
    Connecting,
    /// Handshake completed.
    Connected,
    /// Old session discarded, waiting to spawn a new one.
    Reconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Events reported by a session task.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// CONNECTED received.
    Connected(ConnectedInfo),
    /// Open or negotiation failed. Terminal for this session.
    HandshakeFailed(Error),
    /// MESSAGE received.
    Message(Frame),
    /// ERROR received on an established session.
    BrokerError(Error),
    /// Transport closed after CONNECTED. Terminal for this session.
    Closed(CloseInfo),
}

// ============================================================================
// SessionCommand
// ============================================================================

/// Internal commands for the session task.
enum SessionCommand {
    /// Write a frame.
    Frame(Frame),
    /// Send DISCONNECT and close.
    Shutdown,
}

// ============================================================================
// Session
// ============================================================================

/// Handle to a running session task.
///
/// Dropping the handle shuts the session down.
pub struct Session {
    generation: u64,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl Session {
    /// Spawns a session that opens a link and negotiates.
    ///
    /// `token` is read by the caller at this moment; an absent token opens
    /// an anonymous session.
    pub(crate) fn spawn(
        runtime: &Handle,
        generation: u64,
        connector: Arc<dyn Connector>,
        config: Arc<ClientConfig>,
        token: Option<String>,
        sink: EventSink,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        runtime.spawn(run_session(
            generation,
            connector,
            config,
            token,
            commands_rx,
            sink,
        ));

        Self {
            generation,
            commands: commands_tx,
        }
    }

    /// Generation this session was started under.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues a frame for the broker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the session task has ended.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        self.commands
            .send(SessionCommand::Frame(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Sends DISCONNECT and closes the link.
    ///
    /// Frames queued before this call are written first.
    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session Task
// ============================================================================

async fn run_session(
    generation: u64,
    connector: Arc<dyn Connector>,
    config: Arc<ClientConfig>,
    token: Option<String>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    sink: EventSink,
) {
    let connect_timeout = config.connect_timeout();

    let handshake = tokio::select! {
        result = timeout(connect_timeout, handshake(connector.as_ref(), &config, token.as_deref())) => result,
        () = wait_for_shutdown(&mut commands) => {
            debug!(generation, "Session shut down during handshake");
            return;
        }
    };

    let (link, info) = match handshake {
        Ok(Ok(established)) => established,
        Ok(Err(e)) => {
            sink(SessionEvent::HandshakeFailed(e));
            return;
        }
        Err(_) => {
            sink(SessionEvent::HandshakeFailed(Error::connection_timeout(
                connect_timeout.as_millis() as u64,
            )));
            return;
        }
    };

    info!(
        generation,
        version = %info.version,
        send_every = ?info.heart_beat.send_every,
        expect_every = ?info.heart_beat.expect_every,
        "Session established"
    );

    let negotiated = info.heart_beat;
    sink(SessionEvent::Connected(info));

    run_event_loop(generation, link, negotiated, commands, sink).await;

    debug!(generation, "Session task terminated");
}

/// Opens the link, sends CONNECT and waits for CONNECTED.
async fn handshake(
    connector: &dyn Connector,
    config: &ClientConfig,
    token: Option<&str>,
) -> Result<(Link, ConnectedInfo)> {
    let mut link = connector.open(config.endpoint()).await?;

    let connect = Frame::connect(config.host(), token, config.heart_beat());
    link.send_text(connect.encode())?;

    loop {
        match link.recv().await {
            Some(LinkEvent::Text(text)) => {
                let Some(frame) = Frame::decode(&text)? else {
                    continue;
                };

                match frame.command() {
                    FrameCommand::Connected => {
                        let info = connected_info(&frame, config.heart_beat())?;
                        return Ok((link, info));
                    }
                    FrameCommand::Error => {
                        return Err(Error::handshake(frame.error_message()));
                    }
                    other => {
                        return Err(Error::protocol(format!(
                            "Expected CONNECTED, got {other}"
                        )));
                    }
                }
            }

            Some(LinkEvent::Closed(info)) => {
                return Err(Error::connection(format!(
                    "Closed during handshake: {} {}",
                    info.code, info.reason
                )));
            }

            None => return Err(Error::ConnectionClosed),
        }
    }
}

/// Extracts negotiated parameters from CONNECTED.
fn connected_info(frame: &Frame, offered: HeartBeat) -> Result<ConnectedInfo> {
    let server_beat = match frame.header("heart-beat") {
        Some(raw) => raw.parse::<HeartBeat>()?,
        None => HeartBeat::disabled(),
    };

    Ok(ConnectedInfo {
        version: frame.header("version").unwrap_or("1.0").to_string(),
        server: frame.header("server").map(str::to_string),
        heart_beat: offered.negotiate(server_beat),
    })
}

/// Consumes commands until shutdown is requested.
async fn wait_for_shutdown(commands: &mut mpsc::UnboundedReceiver<SessionCommand>) {
    loop {
        match commands.recv().await {
            Some(SessionCommand::Shutdown) | None => return,
            Some(SessionCommand::Frame(frame)) => {
                trace!(command = %frame.command(), "Dropping frame queued before CONNECTED");
            }
        }
    }
}

// ============================================================================
// Event Loop
// ============================================================================

async fn run_event_loop(
    generation: u64,
    mut link: Link,
    negotiated: Negotiated,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    sink: EventSink,
) {
    let mut send_timer = negotiated.send_every.map(|every| {
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });
    let silence_limit = negotiated.expect_every.map(|every| every * WATCHDOG_FACTOR);
    let mut last_inbound = Instant::now();

    loop {
        let deadline = silence_limit.map(|limit| last_inbound + limit);

        tokio::select! {
            event = link.recv() => {
                match event {
                    Some(LinkEvent::Text(text)) => {
                        last_inbound = Instant::now();
                        handle_inbound(generation, &text, &sink);
                    }

                    Some(LinkEvent::Closed(info)) => {
                        debug!(generation, code = info.code, clean = info.clean, "Link closed");
                        sink(SessionEvent::Closed(info));
                        return;
                    }

                    None => {
                        sink(SessionEvent::Closed(CloseInfo::abnormal("transport task ended")));
                        return;
                    }
                }
            }

            command = commands.recv() => {
                match command {
                    Some(SessionCommand::Frame(frame)) => {
                        let command = frame.command();
                        if let Err(e) = link.send_text(frame.encode()) {
                            warn!(generation, error = %e, %command, "Frame write failed");
                        } else {
                            trace!(generation, %command, "Frame sent");
                        }
                    }

                    Some(SessionCommand::Shutdown) | None => {
                        let _ = link.send_text(Frame::disconnect().encode());
                        link.close();
                        debug!(generation, "Session shut down");
                        return;
                    }
                }
            }

            () = tick(&mut send_timer) => {
                let _ = link.send_text(HEARTBEAT);
                trace!(generation, "Heart-beat sent");
            }

            () = watchdog(deadline) => {
                warn!(generation, limit = ?silence_limit, "Broker heart-beat missed");
                link.close();
                sink(SessionEvent::Closed(CloseInfo {
                    code: HEARTBEAT_TIMEOUT,
                    reason: "heart-beat timeout".to_string(),
                    clean: false,
                }));
                return;
            }
        }
    }
}

/// Decodes one inbound text message and reports it.
fn handle_inbound(generation: u64, text: &str, sink: &EventSink) {
    let frame = match Frame::decode(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            trace!(generation, "Heart-beat received");
            return;
        }
        Err(e) => {
            warn!(generation, error = %e, "Dropping undecodable frame");
            return;
        }
    };

    match frame.command() {
        FrameCommand::Message => sink(SessionEvent::Message(frame)),
        FrameCommand::Error => sink(SessionEvent::BrokerError(Error::broker(frame.error_message()))),
        FrameCommand::Receipt => {
            trace!(generation, receipt = ?frame.header("receipt-id"), "Receipt received");
        }
        other => warn!(generation, command = %other, "Unexpected frame from broker"),
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn watchdog(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::identifiers::{Destination, WireId};
    use crate::transport::memory::MemoryConnector;

    fn config(heart_beat: HeartBeat) -> Arc<ClientConfig> {
        Arc::new(
            ClientConfig::builder()
                .endpoint("ws://broker.test/ws")
                .heart_beat(heart_beat)
                .connect_timeout(Duration::from_secs(5))
                .build()
                .expect("valid config"),
        )
    }

    fn recording_sink() -> (EventSink, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tx = Mutex::new(tx);
        let sink: EventSink = Arc::new(move |event| {
            let _ = tx.lock().send(event);
        });
        (sink, rx)
    }

    #[tokio::test]
    async fn test_handshake_reports_connected() {
        let (connector, mut broker) = MemoryConnector::pair();
        let (sink, mut events) = recording_sink();

        let _session = Session::spawn(
            &Handle::current(),
            1,
            Arc::new(connector),
            config(HeartBeat::disabled()),
            Some("tok".into()),
            sink,
        );

        let mut peer = broker.accept().await.expect("peer");
        let connect = peer.handshake().await.expect("CONNECT");
        assert_eq!(connect.header("Authorization"), Some("Bearer tok"));
        assert_eq!(connect.header("host"), Some("broker.test"));

        match events.recv().await {
            Some(SessionEvent::Connected(info)) => {
                assert_eq!(info.version, "1.2");
                assert_eq!(info.server.as_deref(), Some("memory-broker/1.0"));
            }
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_frame_fails_handshake() {
        let (connector, mut broker) = MemoryConnector::pair();
        let (sink, mut events) = recording_sink();

        let _session = Session::spawn(
            &Handle::current(),
            1,
            Arc::new(connector),
            config(HeartBeat::disabled()),
            None,
            sink,
        );

        let mut peer = broker.accept().await.expect("peer");
        peer.reject("Bad credentials").await.expect("CONNECT");

        match events.recv().await {
            Some(SessionEvent::HandshakeFailed(Error::Handshake { message })) => {
                assert_eq!(message, "Bad credentials");
            }
            other => panic!("expected HandshakeFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refused_open_fails_handshake() {
        let (connector, broker) = MemoryConnector::pair();
        broker.refuse_connections(true);
        let (sink, mut events) = recording_sink();

        let _session = Session::spawn(
            &Handle::current(),
            1,
            Arc::new(connector),
            config(HeartBeat::disabled()),
            None,
            sink,
        );

        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::HandshakeFailed(Error::Connection { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_broker_times_out_handshake() {
        let (connector, mut broker) = MemoryConnector::pair();
        let (sink, mut events) = recording_sink();

        let _session = Session::spawn(
            &Handle::current(),
            1,
            Arc::new(connector),
            config(HeartBeat::disabled()),
            None,
            sink,
        );

        let _peer = broker.accept().await.expect("peer");

        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::HandshakeFailed(Error::ConnectionTimeout { timeout_ms: 5000 }))
        ));
    }

    #[tokio::test]
    async fn test_frames_and_shutdown_in_order() {
        let (connector, mut broker) = MemoryConnector::pair();
        let (sink, mut events) = recording_sink();

        let session = Session::spawn(
            &Handle::current(),
            3,
            Arc::new(connector),
            config(HeartBeat::disabled()),
            None,
            sink,
        );
        assert_eq!(session.generation(), 3);

        let mut peer = broker.accept().await.expect("peer");
        peer.handshake().await.expect("CONNECT");
        assert!(matches!(events.recv().await, Some(SessionEvent::Connected(_))));

        let wire = WireId::next();
        let dest = Destination::new("/topic/a");
        session.send_frame(Frame::subscribe(wire, &dest)).expect("queue");
        drop(session);

        let subscribe = peer.next_frame().await.expect("SUBSCRIBE");
        assert_eq!(subscribe.command(), FrameCommand::Subscribe);
        let disconnect = peer.next_frame().await.expect("DISCONNECT");
        assert_eq!(disconnect.command(), FrameCommand::Disconnect);
        assert!(peer.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_message_and_broker_error_reported() {
        let (connector, mut broker) = MemoryConnector::pair();
        let (sink, mut events) = recording_sink();

        let _session = Session::spawn(
            &Handle::current(),
            1,
            Arc::new(connector),
            config(HeartBeat::disabled()),
            None,
            sink,
        );

        let mut peer = broker.accept().await.expect("peer");
        peer.handshake().await.expect("CONNECT");
        assert!(matches!(events.recv().await, Some(SessionEvent::Connected(_))));

        peer.send_text("\n");
        peer.send_text("garbage");
        peer.message("sub-1", &Destination::new("/topic/a"), "{}");
        peer.send_frame(&Frame::new(FrameCommand::Error).with_header("message", "boom"));
        peer.close(CloseInfo::clean(1000, "bye"));

        assert!(matches!(events.recv().await, Some(SessionEvent::Message(_))));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::BrokerError(Error::Broker { .. }))
        ));
        match events.recv().await {
            Some(SessionEvent::Closed(info)) => assert_eq!(info, CloseInfo::clean(1000, "bye")),
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_sent_and_watchdog_fires() {
        let (connector, mut broker) = MemoryConnector::pair();
        let (sink, mut events) = recording_sink();

        let _session = Session::spawn(
            &Handle::current(),
            1,
            Arc::new(connector),
            config(HeartBeat::new(1_000, 1_000)),
            None,
            sink,
        );

        let mut peer = broker.accept().await.expect("peer");
        let _connect = peer.next_frame().await.expect("CONNECT");
        peer.send_frame(
            &Frame::new(FrameCommand::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "1000,1000"),
        );

        match events.recv().await {
            Some(SessionEvent::Connected(info)) => {
                assert_eq!(info.heart_beat.send_every, Some(Duration::from_secs(1)));
                assert_eq!(info.heart_beat.expect_every, Some(Duration::from_secs(1)));
            }
            other => panic!("expected Connected, got {other:?}"),
        }

        // Broker stays silent: watchdog fires after 2s.
        match events.recv().await {
            Some(SessionEvent::Closed(info)) => {
                assert_eq!(info.code, HEARTBEAT_TIMEOUT);
                assert!(!info.clean);
            }
            other => panic!("expected Closed, got {other:?}"),
        }
    }
}
