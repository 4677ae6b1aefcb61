//! Real-time channel frames.
//!
//! Frames travel as JSON text over the persistent connection:
//!
//! ```json
//! {"type":"message","senderID":"alice","receiverID":"bob","content":"hi"}
//! ```
//!
//! Outbound frames additionally carry a `correlationID`. Inbound text is
//! parsed into the tagged [`Frame`] enum; anything that does not parse is
//! reported as a [`FrameError`] so the caller can log and drop it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{CorrelationId, Identity};

/// Errors produced while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The text is not a JSON object.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON object has no string `type` field.
    #[error("frame has no type tag")]
    MissingType,

    /// The `type` tag names a frame this client does not understand.
    #[error("unknown frame type: {0}")]
    UnknownType(String),

    /// The tag is known but required fields are missing or mistyped.
    #[error("malformed {kind} frame: {source}")]
    Malformed {
        /// The frame type that failed to parse.
        kind: &'static str,
        /// Underlying deserialization error.
        source: serde_json::Error,
    },
}

/// A chat message as carried on the real-time channel.
///
/// Field names follow the wire format. The legacy `SenderID`,
/// `ReceipientID` and `Content` spellings are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFrame {
    /// Who wrote the message.
    #[serde(rename = "senderID", alias = "SenderID")]
    pub sender_id: Identity,
    /// Who the message is addressed to.
    #[serde(rename = "receiverID", alias = "ReceipientID", alias = "RecipientID")]
    pub receiver_id: Identity,
    /// Message text.
    #[serde(alias = "Content")]
    pub content: String,
    /// Client-generated ID echoed back by the server, if any.
    #[serde(
        rename = "correlationID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<CorrelationId>,
}

impl ChatFrame {
    /// Builds an outbound frame with a fresh correlation ID.
    pub fn outbound(sender_id: Identity, receiver_id: Identity, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            receiver_id,
            content: content.into(),
            correlation_id: Some(CorrelationId::new()),
        }
    }

    /// Returns `true` if this frame is exchanged between `a` and `b`, in
    /// either direction.
    #[must_use]
    pub fn is_between(&self, a: &Identity, b: &Identity) -> bool {
        (self.sender_id == *a && self.receiver_id == *b)
            || (self.sender_id == *b && self.receiver_id == *a)
    }
}

/// Every frame type understood on the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// A chat message between two identities.
    Message(ChatFrame),
}

/// WebSocket close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(u16);

impl CloseCode {
    /// Intentional closure; suppresses reconnection.
    pub const NORMAL: Self = Self(1000);
    /// Close frame carried no status code.
    pub const NO_STATUS: Self = Self(1005);
    /// Connection dropped without a close frame.
    pub const ABNORMAL: Self = Self(1006);

    /// Wraps a raw status code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the raw status code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns `true` for the normal-closure code (1000).
    #[must_use]
    pub const fn is_normal(self) -> bool {
        self.0 == Self::NORMAL.0
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serializes a frame to its JSON text form.
///
/// # Errors
///
/// Returns [`FrameError::Json`] if serialization fails.
pub fn encode_frame(frame: &Frame) -> Result<String, FrameError> {
    Ok(serde_json::to_string(frame)?)
}

/// Parses inbound JSON text into a [`Frame`].
///
/// Never panics on arbitrary input.
///
/// # Errors
///
/// Returns a [`FrameError`] describing why the text is not a valid frame.
pub fn decode_frame(text: &str) -> Result<Frame, FrameError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(FrameError::MissingType)?;

    match kind {
        "message" => serde_json::from_value::<ChatFrame>(value)
            .map(Frame::Message)
            .map_err(|source| FrameError::Malformed {
                kind: "message",
                source,
            }),
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}
