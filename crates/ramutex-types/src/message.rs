//! Protocol message types and their wire codec.
//!
//! Peers exchange exactly three kinds of message. On the wire a message is
//! four ASCII integers separated by single spaces, in the fixed order
//! `type sender_id logical_clock deadline_ms`, where `type` is the ordinal of
//! [`MessageType`]. Framing (the trailing newline) belongs to the transport.

use crate::NodeId;
use std::fmt;
use thiserror::Error;

/// The kind of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Ask every other participant for permission to enter.
    Request,
    /// Grant permission to a requester.
    Ack,
    /// Announce that the sender left the critical section.
    Release,
}

impl MessageType {
    /// Wire ordinal of this type.
    pub fn ordinal(self) -> u64 {
        match self {
            Self::Request => 0,
            Self::Ack => 1,
            Self::Release => 2,
        }
    }

    /// Inverse of [`MessageType::ordinal`].
    pub fn from_ordinal(ordinal: u64) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Request),
            1 => Some(Self::Ack),
            2 => Some(Self::Release),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "REQUEST"),
            Self::Ack => write!(f, "ACK"),
            Self::Release => write!(f, "RELEASE"),
        }
    }
}

/// A protocol message. Plain value, no identity beyond its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Message {
    /// Message variant.
    pub kind: MessageType,
    /// Originating participant.
    pub sender_id: NodeId,
    /// Sender's Lamport clock at send time.
    pub logical_clock: u64,
    /// Request deadline in milliseconds (0 = none). Receivers never read it.
    pub deadline_ms: u64,
}

impl Message {
    /// Build a REQUEST carrying the requester's timestamp.
    pub fn request(sender_id: NodeId, logical_clock: u64, deadline_ms: u64) -> Self {
        Self {
            kind: MessageType::Request,
            sender_id,
            logical_clock,
            deadline_ms,
        }
    }

    /// Build an ACK.
    pub fn ack(sender_id: NodeId, logical_clock: u64) -> Self {
        Self {
            kind: MessageType::Ack,
            sender_id,
            logical_clock,
            deadline_ms: 0,
        }
    }

    /// Build a RELEASE.
    pub fn release(sender_id: NodeId, logical_clock: u64) -> Self {
        Self {
            kind: MessageType::Release,
            sender_id,
            logical_clock,
            deadline_ms: 0,
        }
    }
}

/// Reasons a payload is not a valid message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("missing field `{field}`")]
    MissingField { field: &'static str },
    #[error("field `{field}` is not a non-negative integer: {token:?}")]
    InvalidNumber { field: &'static str, token: String },
    #[error("unknown message type ordinal {0}")]
    UnknownType(u64),
    #[error("unexpected trailing data: {0:?}")]
    TrailingData(String),
}

/// Encode a message into its space-separated text form (no delimiter).
pub fn encode_message(msg: &Message) -> String {
    format!(
        "{} {} {} {}",
        msg.kind.ordinal(),
        msg.sender_id,
        msg.logical_clock,
        msg.deadline_ms
    )
}

/// Parse the text form produced by [`encode_message`].
///
/// Fields may be separated by any ASCII whitespace. Anything other than
/// exactly four non-negative integers, with a known type ordinal, is
/// rejected.
pub fn decode_message(raw: &str) -> Result<Message, DecodeError> {
    let mut tokens = raw.split_ascii_whitespace();

    let kind_ordinal: u64 = match tokens.next() {
        Some(token) => parse_field("type", token)?,
        None => return Err(DecodeError::Empty),
    };
    let sender_id: NodeId = parse_field("sender_id", next_token(&mut tokens, "sender_id")?)?;
    let logical_clock: u64 =
        parse_field("logical_clock", next_token(&mut tokens, "logical_clock")?)?;
    let deadline_ms: u64 = parse_field("deadline_ms", next_token(&mut tokens, "deadline_ms")?)?;

    if let Some(extra) = tokens.next() {
        return Err(DecodeError::TrailingData(extra.to_string()));
    }

    let kind =
        MessageType::from_ordinal(kind_ordinal).ok_or(DecodeError::UnknownType(kind_ordinal))?;

    Ok(Message {
        kind,
        sender_id,
        logical_clock,
        deadline_ms,
    })
}

fn next_token<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    field: &'static str,
) -> Result<&'a str, DecodeError> {
    tokens.next().ok_or(DecodeError::MissingField { field })
}

fn parse_field<T: std::str::FromStr>(field: &'static str, token: &str) -> Result<T, DecodeError> {
    token.parse().map_err(|_| DecodeError::InvalidNumber {
        field,
        token: token.to_string(),
    })
}
