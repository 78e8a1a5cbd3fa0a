//! Outbound publishing.
//!
//! Publishing is fire-and-forget. Outcomes, if the broker reports any,
//! arrive on subscribed destinations such as
//! [`Destination::user_success`] and [`Destination::user_error`].

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use crate::error::Result;
use crate::identifiers::Destination;

use super::core::LiveClient;

// ============================================================================
// Publisher
// ============================================================================

/// Send-only view of a [`LiveClient`].
///
/// An optional prefix is prepended to relative paths passed to
/// [`send_to`](Self::send_to), e.g. `/app` for application destinations.
#[derive(Debug, Clone)]
pub struct Publisher {
    client: LiveClient,
    prefix: Option<String>,
}

impl Publisher {
    pub(crate) fn new(client: LiveClient) -> Self {
        Self {
            client,
            prefix: None,
        }
    }

    /// Sets the prefix for [`send_to`](Self::send_to).
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = Some(prefix.trim_end_matches('/').to_string());
        self
    }

    /// Resolves `path` against the prefix.
    #[must_use]
    pub fn destination(&self, path: &str) -> Destination {
        match &self.prefix {
            Some(prefix) => Destination::new(format!("{prefix}/{}", path.trim_start_matches('/'))),
            None => Destination::new(path),
        }
    }

    /// Publishes `body` as JSON to `destination`.
    ///
    /// # Errors
    ///
    /// Same as [`LiveClient::send`].
    pub fn send<T>(&self, destination: &Destination, body: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.client.send(destination, body)
    }

    /// Publishes to `path` resolved against the prefix.
    ///
    /// # Errors
    ///
    /// Same as [`LiveClient::send`].
    pub fn send_to<T>(&self, path: &str, body: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.send(&self.destination(path), body)
    }

    /// Returns `true` if a send would currently be attempted.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

// ============================================================================
// Tests
// ============================================================================
