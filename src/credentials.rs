//! Credential source and rotation notifications.
//!
//! The client never caches a token: it asks the [`CredentialStore`] at the
//! moment of every connect. A [`RotationNotifier`] tells the client that the
//! HTTP layer swapped the token, which triggers a reconnect cycle.
//!
//! [`TokenStore`] is the in-process implementation of both traits:
//!
//! ```ignore
//! let tokens = TokenStore::new(Some(login_token));
//! let client = LiveClient::websocket(config, Arc::new(tokens.clone()))?;
//! client.attach_rotation(&tokens);
//!
//! // Later, from the HTTP refresh path:
//! tokens.set_token(Some(refreshed_token));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

// ============================================================================
// Traits
// ============================================================================

/// Source of the current bearer token.
pub trait CredentialStore: Send + Sync + 'static {
    /// Current token, or `None` for an anonymous session.
    fn token(&self) -> Option<String>;
}

/// Called with the new token (if any) after a rotation.
///
/// Returns `false` once its subscriber is gone; the notifier then drops it.
pub type RotationHandler = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// Source of "token rotated" notifications.
pub trait RotationNotifier: Send + Sync {
    /// Registers a handler invoked after every rotation.
    fn on_rotate(&self, handler: RotationHandler);
}

// ============================================================================
// Anonymous / StaticToken
// ============================================================================

/// Always anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CredentialStore for Anonymous {
    fn token(&self) -> Option<String> {
        None
    }
}

/// A token that never changes.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps a token.
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialStore for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

// ============================================================================
// TokenStore
// ============================================================================

/// Shared, rotatable token.
///
/// Clones share the token and the handler list.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<TokenStoreInner>,
}

#[derive(Default)]
struct TokenStoreInner {
    token: RwLock<Option<String>>,
    handlers: Mutex<Vec<RotationHandler>>,
}

impl TokenStore {
    /// Creates a store holding `token`.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            inner: Arc::new(TokenStoreInner {
                token: RwLock::new(token),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates an empty (anonymous) store.
    #[inline]
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Replaces the token and notifies every registered handler.
    ///
    /// Handlers run on the caller's thread after the token is stored.
    /// Handlers returning `false` are unregistered.
    pub fn set_token(&self, token: Option<String>) {
        *self.inner.token.write() = token.clone();

        let handlers: Vec<RotationHandler> = self.inner.handlers.lock().clone();
        debug!(handlers = handlers.len(), "Token rotated");

        let expired: Vec<RotationHandler> = handlers
            .into_iter()
            .filter(|handler| !handler(token.as_deref()))
            .collect();

        if !expired.is_empty() {
            debug!(expired = expired.len(), "Dropping rotation handlers");
            self.inner
                .handlers
                .lock()
                .retain(|h| !expired.iter().any(|e| Arc::ptr_eq(h, e)));
        }
    }

    /// Number of registered rotation handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }
}

impl CredentialStore for TokenStore {
    fn token(&self) -> Option<String> {
        self.inner.token.read().clone()
    }
}

impl RotationNotifier for TokenStore {
    fn on_rotate(&self, handler: RotationHandler) {
        self.inner.handlers.lock().push(handler);
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("authenticated", &self.inner.token.read().is_some())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
