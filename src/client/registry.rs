//! Subscription registry.
//!
//! Maps destinations to their single wire subscription and the callbacks
//! fanning out from it. Many logical subscribers of one destination share
//! one SUBSCRIBE on the wire; the wire subscription goes away when the last
//! of them leaves.
//!
//! ```text
//! /topic/campaigns/C1/progress ─► sub-4 ─► [sub-4#0 → cb A, sub-4#1 → cb B]
//! /user/queue/pledges/success  ─► sub-5 ─► [sub-5#0 → cb C]
//! ```

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identifiers::{Destination, SubscriptionHandle, WireId};
use crate::protocol::Frame;
use crate::transport::Session;

use super::callback::Callback;

// ============================================================================
// FrameSink
// ============================================================================

/// Where SUBSCRIBE / UNSUBSCRIBE frames go.
pub(crate) trait FrameSink {
    fn send_frame(&self, frame: Frame) -> Result<()>;
}

impl FrameSink for Session {
    fn send_frame(&self, frame: Frame) -> Result<()> {
        Session::send_frame(self, frame)
    }
}

// ============================================================================
// Types
// ============================================================================

/// One logical subscription.
#[derive(Debug, Clone)]
pub(crate) struct Listener {
    pub(crate) handle: SubscriptionHandle,
    pub(crate) callback: Callback,
}

/// Callbacks of one destination, in subscription order.
pub(crate) type Snapshot = Vec<(Destination, Vec<Listener>)>;

/// Wire subscription and its fan-out list.
#[derive(Debug)]
struct Entry {
    wire_id: WireId,
    listeners: Vec<Listener>,
    next_ordinal: u32,
}

impl Entry {
    fn new(wire_id: WireId) -> Self {
        Self {
            wire_id,
            listeners: Vec::new(),
            next_ordinal: 0,
        }
    }

    fn issue_handle(&mut self) -> SubscriptionHandle {
        let handle = SubscriptionHandle::new(self.wire_id, self.next_ordinal);
        self.next_ordinal += 1;
        handle
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Live subscriptions of the current session.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: FxHashMap<Destination, Entry>,
    wires: FxHashMap<WireId, Destination>,
    handles: FxHashMap<SubscriptionHandle, Destination>,
}

impl Registry {
    /// Adds a callback to a destination, subscribing on the wire if it is
    /// the first one.
    ///
    /// `handle` re-admits a replayed subscription under the handle it was
    /// first issued with. A callback already present on the destination
    /// keeps its existing handle.
    ///
    /// # Errors
    ///
    /// Returns the sink error if SUBSCRIBE could not be queued; the registry
    /// is left unchanged.
    pub(crate) fn admit(
        &mut self,
        sink: &dyn FrameSink,
        destination: Destination,
        callback: Callback,
        handle: Option<SubscriptionHandle>,
    ) -> Result<SubscriptionHandle> {
        if let Some(entry) = self.entries.get_mut(&destination) {
            if let Some(existing) = entry.listeners.iter().find(|l| l.callback == callback) {
                debug!(%destination, handle = %existing.handle, "Callback already subscribed");
                return Ok(existing.handle);
            }

            let handle = handle.unwrap_or_else(|| entry.issue_handle());
            entry.listeners.push(Listener { handle, callback });
            self.handles.insert(handle, destination.clone());

            debug!(
                %destination,
                wire_id = %entry.wire_id,
                %handle,
                callbacks = entry.listeners.len(),
                "Callback joined wire subscription"
            );
            return Ok(handle);
        }

        let wire_id = WireId::next();
        sink.send_frame(Frame::subscribe(wire_id, &destination))?;

        let mut entry = Entry::new(wire_id);
        let handle = handle.unwrap_or_else(|| entry.issue_handle());
        entry.listeners.push(Listener { handle, callback });

        self.wires.insert(wire_id, destination.clone());
        self.handles.insert(handle, destination.clone());
        self.entries.insert(destination.clone(), entry);

        debug!(%destination, %wire_id, %handle, "Wire subscription created");
        Ok(handle)
    }

    /// Removes one logical subscription by handle.
    ///
    /// Returns `false` for unknown handles.
    pub(crate) fn remove_handle(
        &mut self,
        sink: Option<&dyn FrameSink>,
        handle: SubscriptionHandle,
    ) -> bool {
        let Some(destination) = self.handles.get(&handle).cloned() else {
            return false;
        };
        self.remove_where(sink, &destination, |l| l.handle == handle)
    }

    /// Removes one logical subscription by callback identity.
    pub(crate) fn remove_callback(
        &mut self,
        sink: Option<&dyn FrameSink>,
        destination: &Destination,
        callback: &Callback,
    ) -> bool {
        self.remove_where(sink, destination, |l| l.callback == *callback)
    }

    fn remove_where(
        &mut self,
        sink: Option<&dyn FrameSink>,
        destination: &Destination,
        matches: impl Fn(&Listener) -> bool,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(destination) else {
            return false;
        };
        let Some(pos) = entry.listeners.iter().position(matches) else {
            return false;
        };

        let removed = entry.listeners.remove(pos);
        self.handles.remove(&removed.handle);

        if !entry.listeners.is_empty() {
            debug!(
                %destination,
                handle = %removed.handle,
                remaining = entry.listeners.len(),
                "Callback left wire subscription"
            );
            return true;
        }

        let wire_id = entry.wire_id;
        self.entries.remove(destination);
        self.wires.remove(&wire_id);

        if let Some(sink) = sink
            && let Err(e) = sink.send_frame(Frame::unsubscribe(wire_id))
        {
            warn!(%destination, %wire_id, error = %e, "UNSUBSCRIBE not sent");
        }
        debug!(%destination, %wire_id, "Wire subscription removed");
        true
    }

    /// Callbacks for an inbound MESSAGE.
    ///
    /// Routes by the `subscription` header, falling back to `destination`
    /// for brokers that omit it.
    pub(crate) fn route(&self, frame: &Frame) -> Option<(Destination, Vec<Callback>)> {
        let destination = match frame.header("subscription").and_then(WireId::parse) {
            Some(wire_id) => self.wires.get(&wire_id).cloned()?,
            None => frame.destination()?,
        };

        let entry = self.entries.get(&destination)?;
        let callbacks = entry.listeners.iter().map(|l| l.callback.clone()).collect();
        Some((destination, callbacks))
    }

    /// Copies every logical subscription without touching the registry.
    pub(crate) fn snapshot(&self) -> Snapshot {
        self.entries
            .iter()
            .map(|(destination, entry)| (destination.clone(), entry.listeners.clone()))
            .collect()
    }

    /// Unsubscribes every wire subscription and empties the registry.
    pub(crate) fn teardown(&mut self, sink: Option<&dyn FrameSink>) {
        if let Some(sink) = sink {
            for entry in self.entries.values() {
                if let Err(e) = sink.send_frame(Frame::unsubscribe(entry.wire_id)) {
                    debug!(wire_id = %entry.wire_id, error = %e, "UNSUBSCRIBE skipped on teardown");
                }
            }
        }

        let count = self.entries.len();
        self.clear();

        if count > 0 {
            debug!(count, "Registry torn down");
        }
    }

    /// Forgets everything without writing frames.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.wires.clear();
        self.handles.clear();
    }

    /// Number of wire subscriptions.
    pub(crate) fn wire_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of callbacks on a destination.
    pub(crate) fn callback_count(&self, destination: &Destination) -> usize {
        self.entries
            .get(destination)
            .map_or(0, |entry| entry.listeners.len())
    }

    /// Returns `true` if the handle is live.
    pub(crate) fn contains_handle(&self, handle: SubscriptionHandle) -> bool {
        self.handles.contains_key(&handle)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::error::Error;
    use crate::protocol::FrameCommand;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Frame>>,
        broken: bool,
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&self, frame: Frame) -> Result<()> {
            if self.broken {
                return Err(Error::ConnectionClosed);
            }
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    impl RecordingSink {
        fn live(&self) -> Option<&dyn FrameSink> {
            Some(self)
        }

        fn commands(&self) -> Vec<FrameCommand> {
            self.frames.lock().iter().map(Frame::command).collect()
        }
    }

    fn noop() -> Callback {
        Callback::new(|_| {})
    }

    fn message_for(handle: SubscriptionHandle) -> Frame {
        Frame::new(FrameCommand::Message)
            .with_header("subscription", handle.wire_id().to_string())
            .with_body("{}")
    }

    #[test]
    fn test_many_callbacks_one_wire_subscription() {
        let sink = RecordingSink::default();
        let mut registry = Registry::default();
        let dest = Destination::new("/topic/a");

        let h1 = registry.admit(&sink, dest.clone(), noop(), None).expect("admit");
        let h2 = registry.admit(&sink, dest.clone(), noop(), None).expect("admit");
        let h3 = registry.admit(&sink, dest.clone(), noop(), None).expect("admit");

        assert_eq!(sink.commands(), vec![FrameCommand::Subscribe]);
        assert_eq!(registry.wire_count(), 1);
        assert_eq!(registry.callback_count(&dest), 3);
        assert_eq!(h1.wire_id(), h2.wire_id());
        assert_eq!(h2.wire_id(), h3.wire_id());
        assert_eq!((h1.ordinal(), h2.ordinal(), h3.ordinal()), (0, 1, 2));
    }

    #[test]
    fn test_same_callback_twice_keeps_handle() {
        let sink = RecordingSink::default();
        let mut registry = Registry::default();
        let dest = Destination::new("/topic/a");
        let cb = noop();

        let h1 = registry.admit(&sink, dest.clone(), cb.clone(), None).expect("admit");
        let h2 = registry.admit(&sink, dest.clone(), cb, None).expect("admit");

        assert_eq!(h1, h2);
        assert_eq!(registry.callback_count(&dest), 1);
    }

    #[test]
    fn test_last_removal_unsubscribes() {
        let sink = RecordingSink::default();
        let mut registry = Registry::default();
        let dest = Destination::new("/topic/a");

        let h1 = registry.admit(&sink, dest.clone(), noop(), None).expect("admit");
        let h2 = registry.admit(&sink, dest.clone(), noop(), None).expect("admit");

        assert!(registry.remove_handle(sink.live(), h1));
        assert_eq!(sink.commands(), vec![FrameCommand::Subscribe]);
        assert_eq!(registry.callback_count(&dest), 1);

        assert!(registry.remove_handle(sink.live(), h2));
        assert_eq!(
            sink.commands(),
            vec![FrameCommand::Subscribe, FrameCommand::Unsubscribe]
        );
        assert_eq!(registry.wire_count(), 0);
        assert!(!registry.contains_handle(h2));
        assert!(!registry.remove_handle(sink.live(), h2));
    }

    #[test]
    fn test_remove_by_callback() {
        let sink = RecordingSink::default();
        let mut registry = Registry::default();
        let dest = Destination::new("/topic/a");
        let keep = noop();
        let drop_me = noop();

        registry.admit(&sink, dest.clone(), keep.clone(), None).expect("admit");
        let h = registry.admit(&sink, dest.clone(), drop_me.clone(), None).expect("admit");

        assert!(registry.remove_callback(sink.live(), &dest, &drop_me));
        assert!(!registry.contains_handle(h));
        assert!(!registry.remove_callback(sink.live(), &dest, &drop_me));

        let (_, callbacks) = registry.route(&message_for(h)).expect("routed");
        assert_eq!(callbacks, vec![keep]);
    }

    #[test]
    fn test_route_isolates_destinations() {
        let sink = RecordingSink::default();
        let mut registry = Registry::default();
        let a = noop();
        let b = noop();

        let ha = registry
            .admit(&sink, Destination::new("/topic/a"), a.clone(), None)
            .expect("admit");
        registry
            .admit(&sink, Destination::new("/topic/b"), b, None)
            .expect("admit");

        let (dest, callbacks) = registry.route(&message_for(ha)).expect("routed");
        assert_eq!(dest.as_str(), "/topic/a");
        assert_eq!(callbacks, vec![a]);
    }

    #[test]
    fn test_route_falls_back_to_destination_header() {
        let sink = RecordingSink::default();
        let mut registry = Registry::default();
        let cb = noop();
        registry
            .admit(&sink, Destination::new("/topic/a"), cb.clone(), None)
            .expect("admit");

        let frame = Frame::new(FrameCommand::Message).with_header("destination", "/topic/a");
        let (_, callbacks) = registry.route(&frame).expect("routed");
        assert_eq!(callbacks, vec![cb]);

        let unknown = Frame::new(FrameCommand::Message).with_header("subscription", "sub-999999");
        assert!(registry.route(&unknown).is_none());
    }

    #[test]
    fn test_failed_subscribe_leaves_registry_unchanged() {
        let sink = RecordingSink {
            broken: true,
            ..Default::default()
        };
        let mut registry = Registry::default();

        let result = registry.admit(&sink, Destination::new("/topic/a"), noop(), None);
        assert!(result.is_err());
        assert_eq!(registry.wire_count(), 0);
    }

    #[test]
    fn test_readmit_with_original_handle() {
        let sink = RecordingSink::default();
        let mut registry = Registry::default();
        let dest = Destination::new("/topic/a");
        let cb = noop();

        let original = registry.admit(&sink, dest.clone(), cb.clone(), None).expect("admit");
        registry.teardown(sink.live());
        assert_eq!(registry.wire_count(), 0);

        let readmitted = registry
            .admit(&sink, dest.clone(), cb, Some(original))
            .expect("admit");
        assert_eq!(readmitted, original);
        assert!(registry.contains_handle(original));
        assert!(registry.remove_handle(sink.live(), original));
    }

    #[test]
    fn test_snapshot_does_not_mutate_and_teardown_unsubscribes_all() {
        let sink = RecordingSink::default();
        let mut registry = Registry::default();
        registry.admit(&sink, Destination::new("/topic/a"), noop(), None).expect("admit");
        registry.admit(&sink, Destination::new("/topic/a"), noop(), None).expect("admit");
        registry.admit(&sink, Destination::new("/topic/b"), noop(), None).expect("admit");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.iter().map(|(_, l)| l.len()).sum::<usize>(), 3);
        assert_eq!(registry.wire_count(), 2);

        registry.teardown(sink.live());
        let unsubscribes = sink
            .commands()
            .into_iter()
            .filter(|c| *c == FrameCommand::Unsubscribe)
            .count();
        assert_eq!(unsubscribes, 2);
        assert_eq!(registry.wire_count(), 0);
    }
}
