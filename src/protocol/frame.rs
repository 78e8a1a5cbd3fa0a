//! STOMP frame encoding and decoding.
//!
//! One WebSocket text message carries one frame:
//!
//! ```text
//! COMMAND
//! header1:value1
//! header2:value2
//!
//! body^@
//! ```
//!
//! Header values are escaped per STOMP 1.2 (`\\`, `\n`, `\r`, `\c`) except
//! on CONNECT and CONNECTED frames. A message holding only end-of-line
//! characters is a heart-beat.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::{Error, Result};
use crate::identifiers::{Destination, WireId};

use super::heartbeat::HeartBeat;

// ============================================================================
// Constants
// ============================================================================

/// Protocol versions offered in CONNECT.
pub const ACCEPT_VERSION: &str = "1.0,1.1,1.2";

/// Content type of every outbound body.
const JSON_CONTENT_TYPE: &str = "application/json";

/// Frame terminator.
const NUL: char = '\0';

// ============================================================================
// FrameCommand
// ============================================================================

/// Frame command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameCommand {
    /// Client opens a session.
    Connect,
    /// Client opens a session (STOMP 1.2 spelling).
    Stomp,
    /// Broker accepts a session.
    Connected,
    /// Client publishes to a destination.
    Send,
    /// Client creates a wire subscription.
    Subscribe,
    /// Client removes a wire subscription.
    Unsubscribe,
    /// Client closes the session.
    Disconnect,
    /// Broker delivers a message for a subscription.
    Message,
    /// Broker acknowledges a frame carrying `receipt`.
    Receipt,
    /// Broker reports an error.
    Error,
}

impl FrameCommand {
    /// Returns the wire spelling.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parses a command line.
    fn parse(line: &str) -> Option<Self> {
        Some(match line {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED headers are sent unescaped.
    #[inline]
    const fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for FrameCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: FrameCommand,
    headers: Vec<(String, String)>,
    body: String,
}

// ============================================================================
// Frame - Construction
// ============================================================================

impl Frame {
    /// Creates an empty frame.
    #[inline]
    #[must_use]
    pub fn new(command: FrameCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// CONNECT frame with version negotiation and heart-beat offer.
    ///
    /// The bearer token is attached only when present; an absent token
    /// opens an anonymous session.
    #[must_use]
    pub fn connect(host: &str, token: Option<&str>, heart_beat: HeartBeat) -> Self {
        let frame = Self::new(FrameCommand::Connect)
            .with_header("accept-version", ACCEPT_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", heart_beat.to_string());

        match token {
            Some(token) => frame.with_header("Authorization", format!("Bearer {token}")),
            None => frame,
        }
    }

    /// SUBSCRIBE frame for a wire subscription.
    #[must_use]
    pub fn subscribe(wire_id: WireId, destination: &Destination) -> Self {
        Self::new(FrameCommand::Subscribe)
            .with_header("id", wire_id.to_string())
            .with_header("destination", destination.as_str())
            .with_header("ack", "auto")
    }

    /// UNSUBSCRIBE frame for a wire subscription.
    #[must_use]
    pub fn unsubscribe(wire_id: WireId) -> Self {
        Self::new(FrameCommand::Unsubscribe).with_header("id", wire_id.to_string())
    }

    /// SEND frame carrying a JSON body.
    #[must_use]
    pub fn send(destination: &Destination, json: String) -> Self {
        Self::new(FrameCommand::Send)
            .with_header("destination", destination.as_str())
            .with_header("content-type", JSON_CONTENT_TYPE)
            .with_header("content-length", json.len().to_string())
            .with_body(json)
    }

    /// DISCONNECT frame.
    #[inline]
    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(FrameCommand::Disconnect)
    }
}

// ============================================================================
// Frame - Accessors
// ============================================================================

impl Frame {
    /// Returns the command.
    #[inline]
    #[must_use]
    pub fn command(&self) -> FrameCommand {
        self.command
    }

    /// Returns the first value of a header.
    ///
    /// Repeated headers keep the first occurrence.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns all headers in wire order.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the body.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Returns the `destination` header as a [`Destination`].
    #[must_use]
    pub fn destination(&self) -> Option<Destination> {
        self.header("destination").map(Destination::new)
    }

    /// Best human-readable reason carried by an ERROR frame.
    #[must_use]
    pub fn error_message(&self) -> String {
        match self.header("message") {
            Some(message) if !message.is_empty() => message.to_string(),
            _ if !self.body.is_empty() => self.body.trim().to_string(),
            _ => "unspecified broker error".to_string(),
        }
    }
}

// ============================================================================
// Frame - Codec
// ============================================================================

impl Frame {
    /// Encodes the frame into a text message.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());

        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }

    /// Decodes a text message.
    ///
    /// Returns `Ok(None)` for a heart-beat (end-of-line only).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on an unknown command, a header line
    /// without `:`, an invalid escape, or a missing terminator.
    pub fn decode(text: &str) -> Result<Option<Self>> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (head, rest) = split_head(text)?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let command_line = lines.next().unwrap_or_default();
        let command = FrameCommand::parse(command_line)
            .ok_or_else(|| Error::protocol(format!("Unknown frame command: {command_line:?}")))?;
        let escape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::protocol(format!("Malformed header line: {line:?}")))?;
            if escape {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(n, _)| n == "content-length")
            .and_then(|(_, v)| v.trim().parse::<usize>().ok());

        let body = match content_length {
            Some(len) => rest
                .get(..len)
                .ok_or_else(|| Error::protocol("Body shorter than content-length"))?,
            None => {
                let end = rest
                    .find(NUL)
                    .ok_or_else(|| Error::protocol("Frame missing NUL terminator"))?;
                &rest[..end]
            }
        };

        Ok(Some(Self {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

// ============================================================================
// Codec Helpers
// ============================================================================

/// Splits a frame into header block and body at the first blank line.
/// Splits at the first empty line. Each line may end in `\n` or `\r\n`.
fn split_head(text: &str) -> Result<(&str, &str)> {
    let mut start = 0;
    while let Some(offset) = text[start..].find('\n') {
        let end = start + offset;
        let line = &text[start..end];
        if line.is_empty() || line == "\r" {
            let head = text[..start].strip_suffix('\n').unwrap_or(&text[..start]);
            let head = head.strip_suffix('\r').unwrap_or(head);
            return Ok((head, &text[end + 1..]));
        }
        start = end + 1;
    }
    Err(Error::protocol("Frame missing header terminator"))
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(Error::protocol(format!(
                    "Invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_connect_frame_anonymous() {
        let frame = Frame::connect("broker", None, HeartBeat::new(10_000, 10_000));
        let text = frame.encode();

        assert!(text.starts_with("CONNECT\n"));
        assert!(text.contains("accept-version:1.0,1.1,1.2\n"));
        assert!(text.contains("heart-beat:10000,10000\n"));
        assert!(!text.contains("Authorization"));
        assert!(text.ends_with("\n\n\0"));
    }

    #[test]
    fn test_connect_frame_with_token() {
        let frame = Frame::connect("broker", Some("abc.def"), HeartBeat::new(0, 0));
        assert_eq!(frame.header("Authorization"), Some("Bearer abc.def"));
    }

    #[test]
    fn test_decode_message() {
        let text = "MESSAGE\nsubscription:sub-3\ndestination:/topic/campaigns/C1/progress\nmessage-id:9\n\n{\"pledged\":100}\0";
        let frame = Frame::decode(text).expect("decode").expect("frame");

        assert_eq!(frame.command(), FrameCommand::Message);
        assert_eq!(frame.header("subscription"), Some("sub-3"));
        assert_eq!(
            frame.destination(),
            Some(Destination::new("/topic/campaigns/C1/progress"))
        );
        assert_eq!(frame.body(), "{\"pledged\":100}");
    }

    #[test]
    fn test_decode_heartbeat() {
        assert_eq!(Frame::decode("\n").expect("decode"), None);
        assert_eq!(Frame::decode("\r\n").expect("decode"), None);
    }

    #[test]
    fn test_decode_leading_eol_before_frame() {
        let frame = Frame::decode("\n\nRECEIPT\nreceipt-id:1\n\n\0")
            .expect("decode")
            .expect("frame");
        assert_eq!(frame.command(), FrameCommand::Receipt);
    }

    #[test]
    fn test_decode_crlf_headers() {
        let frame = Frame::decode("CONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0")
            .expect("decode")
            .expect("frame");
        assert_eq!(frame.header("version"), Some("1.2"));
        assert_eq!(frame.header("heart-beat"), Some("0,0"));
    }

    #[test]
    fn test_decode_crlf_headers_body_with_blank_line() {
        let text = "MESSAGE\r\nsubscription:sub-1\r\ndestination:/topic/a\r\n\r\n{\n\n\"pledged\":1}\0";
        let frame = Frame::decode(text).expect("decode").expect("frame");
        assert_eq!(frame.header("subscription"), Some("sub-1"));
        assert_eq!(frame.header("destination"), Some("/topic/a"));
        assert_eq!(frame.body(), "{\n\n\"pledged\":1}");
    }

    #[test]
    fn test_decode_content_length_allows_nul_in_body() {
        let text = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = Frame::decode(text).expect("decode").expect("frame");
        assert_eq!(frame.body(), "a\0b");
    }

    #[test]
    fn test_decode_unknown_command() {
        let err = Frame::decode("BOGUS\n\n\0").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_decode_missing_nul() {
        assert!(Frame::decode("MESSAGE\nid:1\n\nbody").is_err());
    }

    #[test]
    fn test_decode_invalid_escape() {
        assert!(Frame::decode("MESSAGE\nbad:\\t\n\n\0").is_err());
    }

    #[test]
    fn test_repeated_header_first_wins() {
        let frame = Frame::decode("MESSAGE\nfoo:1\nfoo:2\n\n\0")
            .expect("decode")
            .expect("frame");
        assert_eq!(frame.header("foo"), Some("1"));
    }

    #[test]
    fn test_connected_headers_not_unescaped() {
        let frame = Frame::decode("CONNECTED\nserver:broker\\c1\n\n\0")
            .expect("decode")
            .expect("frame");
        assert_eq!(frame.header("server"), Some("broker\\c1"));
    }

    #[test]
    fn test_send_frame_sets_content_length() {
        let frame = Frame::send(&Destination::new("/app/pledge"), "{\"amount\":5}".into());
        assert_eq!(frame.header("content-length"), Some("12"));
        assert_eq!(frame.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_error_message_prefers_header() {
        let frame = Frame::new(FrameCommand::Error)
            .with_header("message", "Bad credentials")
            .with_body("details");
        assert_eq!(frame.error_message(), "Bad credentials");

        let frame = Frame::new(FrameCommand::Error).with_body("  only body \n");
        assert_eq!(frame.error_message(), "only body");
    }

    proptest! {
        #[test]
        fn prop_header_values_survive_escaping(value in "[a-z:\\\\\\r\\n ]{0,24}") {
            let frame = Frame::new(FrameCommand::Message)
                .with_header("x-value", value.clone())
                .with_body("{}");
            let decoded = Frame::decode(&frame.encode()).unwrap().unwrap();
            prop_assert_eq!(decoded.header("x-value"), Some(value.as_str()));
        }
    }
}
