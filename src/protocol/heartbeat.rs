//! Heart-beat negotiation.
//!
//! Both sides announce `heart-beat: <can-send>,<wants-receive>` in
//! milliseconds. Zero means "not supported" for that direction.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

// ============================================================================
// HeartBeat
// ============================================================================

/// One side's heart-beat announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Smallest interval at which this side can send, in ms.
    pub outgoing_ms: u64,
    /// Desired interval at which this side wants to receive, in ms.
    pub incoming_ms: u64,
}

impl HeartBeat {
    /// Creates an announcement.
    #[inline]
    #[must_use]
    pub const fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    /// Heart-beats disabled in both directions.
    #[inline]
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Negotiates effective intervals against the broker's announcement.
    ///
    /// `self` is the client side, `server` comes from CONNECTED.
    #[must_use]
    pub fn negotiate(self, server: HeartBeat) -> Negotiated {
        let pick = |ours: u64, theirs: u64| {
            (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
        };

        Negotiated {
            send_every: pick(self.outgoing_ms, server.incoming_ms),
            expect_every: pick(self.incoming_ms, server.outgoing_ms),
        }
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

impl FromStr for HeartBeat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (out, inc) = s
            .split_once(',')
            .ok_or_else(|| Error::protocol(format!("Invalid heart-beat header: {s:?}")))?;

        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| Error::protocol(format!("Invalid heart-beat header: {s:?}")))
        };

        Ok(Self::new(parse(out)?, parse(inc)?))
    }
}

// ============================================================================
// Negotiated
// ============================================================================

/// Effective heart-beat intervals for an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// Interval at which the client emits heart-beats.
    pub send_every: Option<Duration>,
    /// Interval at which the broker promised to emit something.
    pub expect_every: Option<Duration>,
}

// ============================================================================
// Tests
// ============================================================================
