//! Subscriptions waiting for a connected session.
//!
//! Filled by `subscribe` calls made while disconnected and by registry
//! snapshots taken when a session goes away. Drained by replay once the
//! next session is connected.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;

use crate::identifiers::{Destination, SubscriptionHandle};

use super::callback::Callback;
use super::registry::Snapshot;

// ============================================================================
// Types
// ============================================================================

/// A callback waiting to be admitted.
///
/// `handle` is set for subscriptions that were live before; replay re-admits
/// them under the same handle.
#[derive(Debug, Clone)]
pub(crate) struct PendingListener {
    pub(crate) handle: Option<SubscriptionHandle>,
    pub(crate) callback: Callback,
}

// ============================================================================
// PendingSet
// ============================================================================

/// Destination to deferred callbacks.
#[derive(Debug, Default)]
pub(crate) struct PendingSet {
    entries: FxHashMap<Destination, Vec<PendingListener>>,
}

impl PendingSet {
    /// Defers a fresh subscription. A callback already waiting on the
    /// destination is not added twice.
    pub(crate) fn defer(&mut self, destination: Destination, callback: Callback) {
        self.push(destination, PendingListener {
            handle: None,
            callback,
        });
    }

    /// Merges a registry snapshot.
    pub(crate) fn absorb(&mut self, snapshot: Snapshot) {
        for (destination, listeners) in snapshot {
            for listener in listeners {
                self.push(destination.clone(), PendingListener {
                    handle: Some(listener.handle),
                    callback: listener.callback,
                });
            }
        }
    }

    /// Puts an entry back after a failed replay.
    pub(crate) fn restore(&mut self, destination: Destination, listeners: Vec<PendingListener>) {
        for listener in listeners {
            self.push(destination.clone(), listener);
        }
    }

    fn push(&mut self, destination: Destination, listener: PendingListener) {
        let waiting = self.entries.entry(destination).or_default();
        if let Some(existing) = waiting
            .iter_mut()
            .find(|l| l.callback == listener.callback)
        {
            if existing.handle.is_none() {
                existing.handle = listener.handle;
            }
            return;
        }
        waiting.push(listener);
    }

    /// Drops a waiting callback by identity.
    pub(crate) fn remove_callback(&mut self, destination: &Destination, callback: &Callback) -> bool {
        self.remove_where(destination, |l| l.callback == *callback)
    }

    /// Takes a waiting callback out of the set so a live subscribe can admit
    /// it under its original handle.
    pub(crate) fn take_callback(
        &mut self,
        destination: &Destination,
        callback: &Callback,
    ) -> Option<PendingListener> {
        let waiting = self.entries.get_mut(destination)?;
        let pos = waiting.iter().position(|l| l.callback == *callback)?;
        let listener = waiting.remove(pos);

        if waiting.is_empty() {
            self.entries.remove(destination);
        }
        Some(listener)
    }

    /// Drops a waiting subscription by the handle it was issued before.
    pub(crate) fn remove_handle(&mut self, handle: SubscriptionHandle) -> bool {
        let destination = self
            .entries
            .iter()
            .find(|(_, waiting)| waiting.iter().any(|l| l.handle == Some(handle)))
            .map(|(destination, _)| destination.clone());

        match destination {
            Some(destination) => self.remove_where(&destination, |l| l.handle == Some(handle)),
            None => false,
        }
    }

    fn remove_where(
        &mut self,
        destination: &Destination,
        matches: impl Fn(&PendingListener) -> bool,
    ) -> bool {
        let Some(waiting) = self.entries.get_mut(destination) else {
            return false;
        };
        let before = waiting.len();
        waiting.retain(|l| !matches(l));
        let removed = waiting.len() != before;

        if waiting.is_empty() {
            self.entries.remove(destination);
        }
        removed
    }

    /// Empties the set, returning its contents.
    pub(crate) fn take(&mut self) -> Vec<(Destination, Vec<PendingListener>)> {
        self.entries.drain().collect()
    }

    /// Returns `true` if nothing is waiting.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of waiting callbacks across all destinations.
    pub(crate) fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Forgets everything.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
