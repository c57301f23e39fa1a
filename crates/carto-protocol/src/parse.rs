//! Classification of inbound client frames.
//!
//! Clients only ever need to send liveness frames. Anything else that is
//! well-formed is tolerated and ignored; frames that are not JSON objects
//! with a string `type` are reported back as [`INVALID_MESSAGE`].

use serde_json::Value;
use thiserror::Error;

use crate::EventKind;

/// Error code sent back when an inbound frame cannot be parsed.
pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";

/// Errors classifying inbound frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The frame was JSON but not an object with a string `type`.
    #[error("frame has no string \"type\" field")]
    MissingType,

    /// The `type` is not part of the event catalog.
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
}

/// What an inbound frame asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `{"type":"ping"}`: answer with a pong.
    Ping,
    /// `{"type":"pong"}`: extend the liveness deadline.
    Pong,
    /// A catalog kind clients have no business sending.
    Other(EventKind),
    /// A kind outside the catalog.
    Unknown(String),
}

/// Classifies one inbound text frame.
///
/// Only malformed frames are errors; unknown kinds come back as
/// [`ClientFrame::Unknown`].
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .as_object()
        .and_then(|obj| obj.get("type"))
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    Ok(match kind.parse::<EventKind>() {
        Ok(EventKind::Ping) => ClientFrame::Ping,
        Ok(EventKind::Pong) => ClientFrame::Pong,
        Ok(other) => ClientFrame::Other(other),
        Err(_) => ClientFrame::Unknown(kind.to_string()),
    })
}
