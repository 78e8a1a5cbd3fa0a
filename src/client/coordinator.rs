//! Reconnection coordinator.
//!
//! Keeps subscriptions alive across sessions. Two cycles lead from one
//! session to the next:
//!
//! ```text
//! rotation:  Connected ─► snapshot ─► teardown ─► settle delay ─► Connecting
//! recovery:  link lost ─► snapshot ─► backoff delay ─► Connecting ─┐
//!                                      ▲                            │ failed
//!                                      └────────────────────────────┘
//! Connecting ─► Connected ─► replay delay ─► replay ─► Connected
//! ```
//!
//! Every step carries the generation it was scheduled under and does nothing
//! if the client moved on in the meantime (hard disconnect, newer cycle).

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::transport::{CloseInfo, ConnectedInfo, Session, SessionState};
use crate::transport::session::{EventSink, SessionEvent};

use super::core::{ClientInner, ClientState, Cycle};
use super::registry::FrameSink;

// ============================================================================
// Session Start
// ============================================================================

impl ClientInner {
    /// Spawns a session with the token current at this moment.
    pub(crate) fn start_session(&self, state: &mut ClientState) {
        state.generation += 1;
        let generation = state.generation;
        let token = self.credentials.token();

        info!(
            generation,
            authenticated = token.is_some(),
            endpoint = %self.config.endpoint(),
            "Connecting"
        );

        state.session = Some(Session::spawn(
            &self.runtime,
            generation,
            self.connector.clone(),
            self.config.clone(),
            token,
            self.event_sink(generation),
        ));
        state.phase = SessionState::Connecting;
    }

    fn event_sink(&self, generation: u64) -> EventSink {
        let weak = self.this.clone();
        Arc::new(move |event: SessionEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(generation, event);
            }
        })
    }
}

// ============================================================================
// Session Events
// ============================================================================

impl ClientInner {
    pub(crate) fn handle_event(&self, generation: u64, event: SessionEvent) {
        match event {
            SessionEvent::Connected(info) => self.on_connected(generation, &info),
            SessionEvent::HandshakeFailed(e) => self.on_handshake_failed(generation, &e),
            SessionEvent::Message(frame) => self.dispatch(generation, &frame),
            SessionEvent::BrokerError(e) => self.on_broker_error(generation, &e),
            SessionEvent::Closed(info) => self.on_closed(generation, &info),
        }
    }

    fn on_connected(&self, generation: u64, info: &ConnectedInfo) {
        {
            let mut state = self.state.lock();
            if !is_current(&state, generation, "CONNECTED") {
                return;
            }

            state.phase = SessionState::Connected;
            state.recovery_attempt = 0;

            if state.pending.is_empty() {
                finish_cycle(&mut state);
            } else {
                debug!(generation, pending = state.pending.len(), "Replay scheduled");
                self.schedule_replay(generation);
            }
        }

        self.hooks.fire_connect(info);
    }

    fn on_handshake_failed(&self, generation: u64, e: &Error) {
        {
            let mut state = self.state.lock();
            if !is_current(&state, generation, "handshake failure") {
                return;
            }

            state.session = None;
            state.phase = SessionState::Disconnected;

            let retry = state.cycle == Some(Cycle::Recovery) && e.is_recoverable();
            if retry && self.schedule_recovery(&mut state) {
                warn!(generation, error = %e, "Reconnect attempt failed");
            } else {
                error!(generation, code = e.code(), error = %e, "Handshake failed");
                state.rotating = false;
                state.cycle = None;
            }
        }

        self.hooks.fire_error(e);
    }

    fn on_broker_error(&self, generation: u64, e: &Error) {
        if !is_current(&self.state.lock(), generation, "ERROR frame") {
            return;
        }

        warn!(generation, error = %e, "Broker reported an error");
        self.hooks.fire_error(e);
    }

    fn on_closed(&self, generation: u64, info: &CloseInfo) {
        {
            let mut state = self.state.lock();
            if !is_current(&state, generation, "close") {
                return;
            }

            warn!(
                generation,
                code = info.code,
                reason = %info.reason,
                clean = info.clean,
                "Session closed"
            );

            let snapshot = state.registry.snapshot();
            state.pending.absorb(snapshot);
            state.registry.clear();
            state.session = None;
            state.phase = SessionState::Disconnected;
            state.rotating = false;
            state.cycle = None;
            state.recovery_attempt = 0;

            if self.config.reconnect().enabled {
                state.cycle = Some(Cycle::Recovery);
                if !self.schedule_recovery(&mut state) {
                    state.cycle = None;
                }
            }
        }

        self.hooks.fire_close(info);
    }
}

// ============================================================================
// Rotation
// ============================================================================

impl ClientInner {
    /// Starts a rotation cycle.
    ///
    /// Coalesced while one is in flight; ignored unless connected or
    /// connecting.
    pub(crate) fn rotate(&self) {
        let session = {
            let mut state = self.state.lock();

            if state.rotating {
                debug!(generation = state.generation, "Rotation coalesced");
                return;
            }
            if !matches!(state.phase, SessionState::Connected | SessionState::Connecting) {
                debug!(phase = %state.phase, "Rotation ignored");
                return;
            }

            state.rotating = true;
            state.cycle = Some(Cycle::Rotation);

            let snapshot = state.registry.snapshot();
            state.pending.absorb(snapshot);

            let session = state.session.take();
            state
                .registry
                .teardown(session.as_ref().map(|s| s as &dyn FrameSink));

            state.phase = SessionState::Reconnecting;
            state.generation += 1;
            let generation = state.generation;

            info!(
                generation,
                pending = state.pending.len(),
                settle = ?self.config.settle_delay(),
                "Credentials rotated, reconnecting"
            );
            self.schedule_reconnect(generation, self.config.settle_delay());
            session
        };

        drop(session);
    }
}

// ============================================================================
// Scheduled Steps
// ============================================================================

impl ClientInner {
    /// Schedules the next recovery attempt. Returns `false` once the policy
    /// is exhausted.
    fn schedule_recovery(&self, state: &mut ClientState) -> bool {
        let policy = self.config.reconnect();
        if !policy.allows(state.recovery_attempt) {
            warn!(attempts = state.recovery_attempt, "Giving up reconnecting");
            return false;
        }

        let delay = policy.delay_for(state.recovery_attempt);
        state.recovery_attempt += 1;
        state.phase = SessionState::Reconnecting;
        state.generation += 1;

        info!(
            attempt = state.recovery_attempt,
            max_attempts = policy.max_attempts,
            delay = ?delay,
            "Reconnect scheduled"
        );
        self.schedule_reconnect(state.generation, delay);
        true
    }

    /// Starts a session after `delay` unless the cycle was abandoned.
    fn schedule_reconnect(&self, generation: u64, delay: Duration) {
        let weak = self.this.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut state = inner.state.lock();
            if state.generation != generation || state.phase != SessionState::Reconnecting {
                debug!(generation, current = state.generation, "Reconnect abandoned");
                return;
            }
            inner.start_session(&mut state);
        });
    }

    /// Replays the Pending Set after the replay delay.
    fn schedule_replay(&self, generation: u64) {
        let weak = self.this.clone();
        let delay = self.config.replay_delay();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            if let Some(inner) = weak.upgrade() {
                inner.replay(generation);
            }
        });
    }

    /// Admits every pending subscription onto the current session.
    fn replay(&self, generation: u64) {
        let mut state = self.state.lock();
        let state = &mut *state;

        if state.generation != generation || state.phase != SessionState::Connected {
            debug!(generation, current = state.generation, "Replay abandoned");
            return;
        }
        let Some(session) = state.session.as_ref() else {
            return;
        };

        let mut replayed = 0usize;
        let mut failed = 0usize;

        for (destination, listeners) in state.pending.take() {
            let mut rest = listeners.into_iter();
            while let Some(listener) = rest.next() {
                match state.registry.admit(
                    session,
                    destination.clone(),
                    listener.callback.clone(),
                    listener.handle,
                ) {
                    Ok(_) => replayed += 1,
                    Err(e) => {
                        debug!(%destination, error = %e, "Replay deferred");
                        let mut left = vec![listener];
                        left.extend(rest);
                        failed += left.len();
                        state.pending.restore(destination, left);
                        break;
                    }
                }
            }
        }

        if state.pending.is_empty() {
            finish_cycle(state);
            info!(generation, replayed, wires = state.registry.wire_count(), "Subscriptions replayed");
        } else {
            warn!(generation, replayed, failed, "Replay incomplete");
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn is_current(state: &ClientState, generation: u64, what: &str) -> bool {
    if state.generation == generation {
        return true;
    }
    debug!(generation, current = state.generation, what, "Dropping stale session event");
    false
}

fn finish_cycle(state: &mut ClientState) {
    if let Some(cycle) = state.cycle.take() {
        debug!(?cycle, generation = state.generation, "Cycle complete");
    }
    state.rotating = false;
}

// ============================================================================
// Tests
// ============================================================================
