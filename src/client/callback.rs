//! Subscriber callbacks.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::protocol::Payload;

// ============================================================================
// Callback
// ============================================================================

/// Application function invoked for every message on a destination.
///
/// Identity is reference identity: clones of one `Callback` are the same
/// subscriber, two `Callback::new` calls with identical closures are not.
/// Keep a clone around to remove the subscription by callback later.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(&Payload) + Send + Sync>);

impl Callback {
    /// Wraps a function.
    #[inline]
    #[must_use]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invokes the function.
    #[inline]
    pub fn call(&self, payload: &Payload) {
        (self.0)(payload);
    }

    /// Returns `true` if both refer to the same function object.
    #[inline]
    #[must_use]
    pub fn same_as(&self, other: &Callback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Callback {}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_identity_is_reference_identity() {
        let a = Callback::new(|_| {});
        let b = Callback::new(|_| {});
        let a2 = a.clone();

        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_call_invokes_function() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let cb = Callback::new(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        cb.call(&Payload::Raw("x".into()));
        cb.call(&Payload::Raw("y".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
