//! Lifecycle hooks.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Error;
use crate::transport::{CloseInfo, ConnectedInfo};

// ============================================================================
// Types
// ============================================================================

/// Invoked after every successful handshake, including reconnects.
pub type ConnectHook = Arc<dyn Fn(&ConnectedInfo) + Send + Sync>;

/// Invoked on handshake rejection and on broker ERROR frames.
pub type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

/// Invoked when an established session closes without being asked to.
pub type CloseHook = Arc<dyn Fn(&CloseInfo) + Send + Sync>;

// ============================================================================
// Hooks
// ============================================================================

/// One optional slot per hook. Setting a hook replaces the previous one.
#[derive(Default)]
pub(crate) struct Hooks {
    connect: RwLock<Option<ConnectHook>>,
    error: RwLock<Option<ErrorHook>>,
    close: RwLock<Option<CloseHook>>,
}

impl Hooks {
    pub(crate) fn set_connect(&self, hook: ConnectHook) {
        *self.connect.write() = Some(hook);
    }

    pub(crate) fn set_error(&self, hook: ErrorHook) {
        *self.error.write() = Some(hook);
    }

    pub(crate) fn set_close(&self, hook: CloseHook) {
        *self.close.write() = Some(hook);
    }

    // The slot lock is released before the hook runs, so hooks may replace
    // themselves.

    pub(crate) fn fire_connect(&self, info: &ConnectedInfo) {
        let hook = self.connect.read().clone();
        if let Some(hook) = hook {
            hook(info);
        }
    }

    pub(crate) fn fire_error(&self, error: &Error) {
        let hook = self.error.read().clone();
        if let Some(hook) = hook {
            hook(error);
        }
    }

    pub(crate) fn fire_close(&self, info: &CloseInfo) {
        let hook = self.close.read().clone();
        if let Some(hook) = hook {
            hook(info);
        }
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
    fn test_unset_hooks_are_noops() {
        let hooks = Hooks::default();
        hooks.fire_error(&Error::NotConnected);
        hooks.fire_close(&CloseInfo::clean(1000, "bye"));
    }

    #[test]
    fn test_setting_replaces_previous() {
        let hooks = Hooks::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        hooks.set_error(Arc::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = Arc::clone(&second);
        hooks.set_error(Arc::new(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        hooks.fire_error(&Error::NotConnected);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
