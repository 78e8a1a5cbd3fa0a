//! Client configuration and its builder.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use crowdfund_live::ClientConfig;
//!
//! # fn example() -> crowdfund_live::Result<()> {
//! let config = ClientConfig::builder()
//!     .endpoint("wss://api.example.org/ws")
//!     .settle_delay(Duration::from_secs(2))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::HeartBeat;

// ============================================================================
// Constants
// ============================================================================

/// Heart-beat offered in CONNECT (ms, both directions).
const DEFAULT_HEART_BEAT_MS: u64 = 10_000;

/// Time allowed for open + CONNECTED.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between credential rotation and reconnect.
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Pause between CONNECTED and subscription replay.
const DEFAULT_REPLAY_DELAY: Duration = Duration::from_millis(250);

/// First recovery delay after transport loss.
const DEFAULT_RECOVERY_INITIAL: Duration = Duration::from_secs(1);

/// Upper bound on recovery delay.
const DEFAULT_RECOVERY_MAX: Duration = Duration::from_secs(30);

/// Recovery attempts before giving up.
const DEFAULT_RECOVERY_ATTEMPTS: u32 = 5;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Automatic reconnection after transport loss.
///
/// Credential rotation always reconnects. This policy only governs what
/// happens when an established session drops on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect at all.
    pub enabled: bool,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Cap on the exponential delay.
    pub max_delay: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Never reconnect on transport loss.
    #[inline]
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            initial_delay: DEFAULT_RECOVERY_INITIAL,
            max_delay: DEFAULT_RECOVERY_MAX,
            max_attempts: 0,
        }
    }

    /// Delay before attempt number `attempt` (zero-based).
    ///
    /// Doubles per attempt, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether another attempt is allowed after `attempts` failures.
    #[inline]
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        self.enabled && attempts < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: DEFAULT_RECOVERY_INITIAL,
            max_delay: DEFAULT_RECOVERY_MAX,
            max_attempts: DEFAULT_RECOVERY_ATTEMPTS,
        }
    }
}

// ============================================================================
// ClientConfig
// ============================================================================

/// Validated client configuration.
///
/// Use [`ClientConfig::builder()`] to create one.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    endpoint: Url,
    host: String,
    heart_beat: HeartBeat,
    connect_timeout: Duration,
    settle_delay: Duration,
    replay_delay: Duration,
    reconnect: ReconnectPolicy,
}

impl ClientConfig {
    /// Creates a new configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Broker URL.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Value of the CONNECT `host` header.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Heart-beat offered in CONNECT.
    #[inline]
    #[must_use]
    pub fn heart_beat(&self) -> HeartBeat {
        self.heart_beat
    }

    /// Time allowed for open + CONNECTED.
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Pause between credential rotation and reconnect.
    #[inline]
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Pause between CONNECTED and subscription replay.
    #[inline]
    #[must_use]
    pub fn replay_delay(&self) -> Duration {
        self.replay_delay
    }

    /// Recovery policy for transport loss.
    #[inline]
    #[must_use]
    pub fn reconnect(&self) -> ReconnectPolicy {
        self.reconnect
    }
}

// ============================================================================
// ClientConfigBuilder
// ============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    endpoint: Option<String>,
    host: Option<String>,
    heart_beat: HeartBeat,
    connect_timeout: Duration,
    settle_delay: Duration,
    replay_delay: Duration,
    reconnect: ReconnectPolicy,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            host: None,
            heart_beat: HeartBeat::new(DEFAULT_HEART_BEAT_MS, DEFAULT_HEART_BEAT_MS),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            replay_delay: DEFAULT_REPLAY_DELAY,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfigBuilder {
    /// Creates a builder with default timings and no endpoint.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the broker URL (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    /// Overrides the CONNECT `host` header (defaults to the URL host).
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the heart-beat offer.
    #[inline]
    #[must_use]
    pub fn heart_beat(mut self, heart_beat: HeartBeat) -> Self {
        self.heart_beat = heart_beat;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the pause between credential rotation and reconnect.
    #[inline]
    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the pause between CONNECTED and subscription replay.
    #[inline]
    #[must_use]
    pub fn replay_delay(mut self, delay: Duration) -> Self {
        self.replay_delay = delay;
        self
    }

    /// Sets the recovery policy for transport loss.
    #[inline]
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the endpoint is missing or not `ws`/`wss`
    /// - [`Error::Url`] if the endpoint does not parse
    /// - [`Error::Config`] if the connect timeout is zero or the recovery
    ///   delays are inverted
    pub fn build(self) -> Result<ClientConfig> {
        let endpoint = self.validate_endpoint()?;
        self.validate_timings()?;

        let host = match self.host {
            Some(host) => host,
            None => endpoint.host_str().unwrap_or("localhost").to_string(),
        };

        Ok(ClientConfig {
            endpoint,
            host,
            heart_beat: self.heart_beat,
            connect_timeout: self.connect_timeout,
            settle_delay: self.settle_delay,
            replay_delay: self.replay_delay,
            reconnect: self.reconnect,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientConfigBuilder {
    fn validate_endpoint(&self) -> Result<Url> {
        let raw = self.endpoint.as_deref().ok_or_else(|| {
            Error::config(
                "Broker endpoint is required. Use .endpoint() to set it.\n\
                 Example: ClientConfig::builder().endpoint(\"wss://api.example.org/ws\")",
            )
        })?;

        let url = Url::parse(raw)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::config(format!(
                "Broker endpoint must use ws:// or wss://, got {other}://"
            ))),
        }
    }

    fn validate_timings(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("Connect timeout must be greater than zero"));
        }
        if self.reconnect.enabled && self.reconnect.max_delay < self.reconnect.initial_delay {
            return Err(Error::config(
                "Reconnect max_delay must not be smaller than initial_delay",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
