//! Wire protocol shared by the match relay server and its peers.
//!
//! Only two server-originated messages exist. Both are fixed-size, big-endian
//! and carry no length prefix: the frame size is the framing. Everything a
//! peer sends after `MatchStart` is opaque to the server and relayed as-is.

use std::fmt;
use std::str::FromStr;

/// Message type byte of [`ServerMessage::MatchId`].
pub const MATCH_ID_MESSAGE: u8 = 1;
/// Message type byte of [`ServerMessage::MatchStart`].
pub const MATCH_START_MESSAGE: u8 = 2;

const MATCH_ID_LEN: usize = 5;
const MATCH_START_LEN: usize = 2;

/// Four-digit match identifier, `0000` through `9999`.
///
/// Peers exchange it out of band as the zero-padded string (`?mid=0042`) and
/// receive it on the wire as a big-endian `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchId(u32);

impl MatchId {
    /// Number of distinct identifiers.
    pub const SPACE: u32 = 10_000;

    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        if raw < Self::SPACE {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Maps any integer into the identifier space.
    #[must_use]
    pub const fn wrapping(raw: u32) -> Self {
        Self(raw % Self::SPACE)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.0;
        write!(f, "{raw:04}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid match id {0:?}: expected four digits")]
pub struct ParseMatchIdError(String);

impl FromStr for MatchId {
    type Err = ParseMatchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseMatchIdError(s.to_owned()));
        }
        s.parse::<u32>()
            .map(Self)
            .map_err(|_| ParseMatchIdError(s.to_owned()))
    }
}

/// Which side of the match a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Client,
}

impl Role {
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Host => 1,
            Self::Client => 2,
        }
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Host),
            2 => Some(Self::Client),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Handshake messages sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessage {
    /// Tells a freshly connected host which id its client must join with.
    MatchId(MatchId),
    /// Both peers are connected; relaying starts after this message.
    MatchStart(Role),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("message type {message_type} expects {expected} bytes, got {actual}")]
    Length {
        message_type: u8,
        expected: usize,
        actual: usize,
    },
    #[error("unknown role {0}")]
    UnknownRole(u8),
    #[error("match id {0} out of range")]
    MatchIdOutOfRange(u32),
}

impl ServerMessage {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::MatchId(id) => {
                let mut buf = Vec::with_capacity(MATCH_ID_LEN);
                buf.push(MATCH_ID_MESSAGE);
                buf.extend_from_slice(&id.get().to_be_bytes());
                buf
            }
            Self::MatchStart(role) => vec![MATCH_START_MESSAGE, role.to_byte()],
        }
    }

    /// Parses a handshake frame.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the frame is empty, has an unknown type
    /// byte, does not have the exact size of its type, or carries a role or
    /// match id outside the defined values.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        match *bytes {
            [MATCH_ID_MESSAGE, a, b, c, d] => {
                let raw = u32::from_be_bytes([a, b, c, d]);
                MatchId::new(raw)
                    .map(Self::MatchId)
                    .ok_or(DecodeError::MatchIdOutOfRange(raw))
            }
            [MATCH_START_MESSAGE, role] => Role::from_byte(role)
                .map(Self::MatchStart)
                .ok_or(DecodeError::UnknownRole(role)),
            [MATCH_ID_MESSAGE, ..] => Err(DecodeError::Length {
                message_type: MATCH_ID_MESSAGE,
                expected: MATCH_ID_LEN,
                actual: bytes.len(),
            }),
            [MATCH_START_MESSAGE, ..] => Err(DecodeError::Length {
                message_type: MATCH_START_MESSAGE,
                expected: MATCH_START_LEN,
                actual: bytes.len(),
            }),
            [other, ..] => Err(DecodeError::UnknownType(other)),
            [] => Err(DecodeError::Empty),
        }
    }
}
