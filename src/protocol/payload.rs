//! Inbound message content.

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde_json::Value;

// ============================================================================
// Payload
// ============================================================================

/// Content of an inbound message, as handed to subscriber callbacks.
///
/// Bodies are expected to be JSON. A body that fails to parse is still
/// delivered, as [`Payload::Raw`], so no frame is dropped on the floor.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Body parsed as JSON.
    Decoded(Value),
    /// Body that is not valid JSON, verbatim.
    Raw(String),
}

impl Payload {
    /// Decodes a frame body.
    #[must_use]
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::Decoded(value),
            Err(_) => Self::Raw(body.to_string()),
        }
    }

    /// Returns the JSON value if the body decoded.
    #[inline]
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Decoded(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// Returns the raw text if the body did not decode.
    #[inline]
    #[must_use]
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Self::Decoded(_) => None,
            Self::Raw(text) => Some(text),
        }
    }

    /// Deserializes a decoded payload into a typed event.
    ///
    /// Returns `None` for raw payloads or on a shape mismatch.
    #[must_use]
    pub fn parse<T: DeserializeOwned>(&self) -> Option<T> {
        self.as_json()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

// ============================================================================
// Tests
// ============================================================================
