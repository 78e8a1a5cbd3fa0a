//! Type-safe identifiers for messaging entities.
//!
//! Newtype wrappers prevent mixing destinations, wire subscription ids and
//! application handles at compile time.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`Destination`] | Broker topic string |
//! | [`WireId`] | Broker-level subscription id (`id` header) |
//! | [`SubscriptionHandle`] | Application handle for one logical subscription |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Constants
// ============================================================================

/// Prefix for per-campaign progress channels.
const CAMPAIGN_PROGRESS_PREFIX: &str = "/topic/campaigns";

/// Private per-user pledge success channel.
const USER_SUCCESS_CHANNEL: &str = "/user/queue/pledges/success";

/// Private per-user pledge error channel.
const USER_ERROR_CHANNEL: &str = "/user/queue/pledges/error";

/// Process-wide wire id counter.
static NEXT_WIRE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Destination
// ============================================================================

/// Broker topic identifying a channel.
///
/// Opaque to the client: two destinations are the same channel iff their
/// strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination(String);

impl Destination {
    /// Creates a destination from a raw topic string.
    #[inline]
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Live funding progress for one campaign.
    ///
    /// The campaign id is percent-encoded so ids containing `/` cannot
    /// escape the channel prefix.
    #[must_use]
    pub fn campaign_progress(campaign_id: &str) -> Self {
        Self(format!(
            "{CAMPAIGN_PROGRESS_PREFIX}/{}/progress",
            urlencoding::encode(campaign_id)
        ))
    }

    /// Pledge confirmations for the authenticated user.
    ///
    /// Identity comes from the session, so the channel is unparameterized.
    #[inline]
    #[must_use]
    pub fn user_success() -> Self {
        Self(USER_SUCCESS_CHANNEL.to_string())
    }

    /// Pledge failures for the authenticated user.
    #[inline]
    #[must_use]
    pub fn user_error() -> Self {
        Self(USER_ERROR_CHANNEL.to_string())
    }

    /// Returns the topic string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Destination {
    fn from(topic: &str) -> Self {
        Self::new(topic)
    }
}

impl From<String> for Destination {
    fn from(topic: String) -> Self {
        Self(topic)
    }
}

// ============================================================================
// WireId
// ============================================================================

/// Broker-level subscription id.
///
/// Allocated from a process-wide counter, so ids from a discarded session
/// never alias ids of the session that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireId(u64);

impl WireId {
    /// Allocates the next wire id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_WIRE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Parses the `subscription` header of a MESSAGE frame.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        header
            .strip_prefix("sub-")
            .and_then(|n| n.parse::<u64>().ok())
            .map(Self)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// SubscriptionHandle
// ============================================================================

/// Handle for one logical subscription.
///
/// Derived from the wire id that admitted it plus a per-destination ordinal.
/// A handle stays valid across reconnects: replay re-admits the callback
/// under the same handle even though the wire id changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    wire_id: WireId,
    ordinal: u32,
}

impl SubscriptionHandle {
    /// Creates a handle.
    #[inline]
    #[must_use]
    pub const fn new(wire_id: WireId, ordinal: u32) -> Self {
        Self { wire_id, ordinal }
    }

    /// Wire id that was live when the handle was issued.
    #[inline]
    #[must_use]
    pub const fn wire_id(&self) -> WireId {
        self.wire_id
    }

    /// Ordinal within the destination.
    #[inline]
    #[must_use]
    pub const fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.wire_id, self.ordinal)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_progress_encodes_id() {
        let dest = Destination::campaign_progress("C1");
        assert_eq!(dest.as_str(), "/topic/campaigns/C1/progress");

        let dest = Destination::campaign_progress("a/b c");
        assert_eq!(dest.as_str(), "/topic/campaigns/a%2Fb%20c/progress");
    }

    #[test]
    fn test_user_channels_differ() {
        assert_ne!(Destination::user_success(), Destination::user_error());
    }

    #[test]
    fn test_wire_ids_are_unique() {
        let a = WireId::next();
        let b = WireId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_wire_id_parse() {
        let id = WireId::next();
        assert_eq!(WireId::parse(&id.to_string()), Some(id));
        assert_eq!(WireId::parse("sub-x"), None);
        assert_eq!(WireId::parse("42"), None);
    }

    #[test]
    fn test_handle_display() {
        let wire = WireId::parse("sub-7").expect("valid");
        let handle = SubscriptionHandle::new(wire, 2);
        assert_eq!(handle.to_string(), "sub-7#2");
        assert_eq!(handle.wire_id(), wire);
        assert_eq!(handle.ordinal(), 2);
    }
}
