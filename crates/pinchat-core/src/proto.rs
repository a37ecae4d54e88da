//! Handshake tokens and relayed message frames.
//!
//! Handshake (one frame each):
//!
//! ```text
//! host  → peer   AUTH_REQUEST
//! peer  → host   <candidate secret>
//! host  → peer   AUTH_SUCCESS | AUTH_FAILED
//! ```
//!
//! After the handshake a peer sends raw message text; the host relays it to
//! the other peers as `"<sender>: <content>"`.

use std::fmt;

use crate::error::FrameError;

/// Separator between sender and content in a relayed frame.
pub const RELAY_SEPARATOR: &str = ": ";

/// Fixed handshake tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// Host challenges the peer for the session secret
    AuthRequest,
    /// Secret accepted, the peer may send messages
    AuthSuccess,
    /// Secret rejected, the host closes the connection
    AuthFailed,
}

impl Token {
    /// Wire text of this token.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthRequest => "AUTH_REQUEST",
            Self::AuthSuccess => "AUTH_SUCCESS",
            Self::AuthFailed => "AUTH_FAILED",
        }
    }

    /// Parse a frame payload as a token. Exact match only.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "AUTH_REQUEST" => Some(Self::AuthRequest),
            "AUTH_SUCCESS" => Some(Self::AuthSuccess),
            "AUTH_FAILED" => Some(Self::AuthFailed),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message relayed by the host on behalf of a sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    /// Original sender (`peer2`, `host`)
    pub sender: String,
    /// Message text
    pub content: String,
}

impl RelayFrame {
    /// Create a relay frame.
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self { sender: sender.into(), content: content.into() }
    }

    /// Wire text: `"<sender>: <content>"`.
    pub fn encode(&self) -> String {
        format!("{}{RELAY_SEPARATOR}{}", self.sender, self.content)
    }

    /// Split wire text at the first separator.
    ///
    /// Content may itself contain `": "`; only the first occurrence splits.
    ///
    /// # Errors
    ///
    /// - [`FrameError::MalformedRelay`] if no separator is present
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let (sender, content) =
            text.split_once(RELAY_SEPARATOR).ok_or(FrameError::MalformedRelay)?;
        Ok(Self::new(sender, content))
    }
}

impl fmt::Display for RelayFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{RELAY_SEPARATOR}{}", self.sender, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_parse_exactly() {
        for token in [Token::AuthRequest, Token::AuthSuccess, Token::AuthFailed] {
            assert_eq!(Token::parse(token.as_str()), Some(token));
        }
        assert_eq!(Token::parse("auth_success"), None);
        assert_eq!(Token::parse("AUTH_SUCCESS\n"), None);
        assert_eq!(Token::parse(""), None);
    }

    #[test]
    fn relay_frame_format() {
        assert_eq!(RelayFrame::new("peer2", "hi").encode(), "peer2: hi");
    }

    #[test]
    fn relay_decode_splits_at_first_separator() {
        let frame = RelayFrame::decode("host: note: bring snacks").unwrap();
        assert_eq!(frame.sender, "host");
        assert_eq!(frame.content, "note: bring snacks");
    }

    #[test]
    fn relay_decode_allows_empty_content() {
        let frame = RelayFrame::decode("peer1: ").unwrap();
        assert_eq!(frame.sender, "peer1");
        assert_eq!(frame.content, "");
    }

    #[test]
    fn relay_decode_rejects_missing_separator() {
        assert_eq!(RelayFrame::decode("peer1 hi"), Err(FrameError::MalformedRelay));
        assert_eq!(RelayFrame::decode("peer1:hi"), Err(FrameError::MalformedRelay));
    }
}
