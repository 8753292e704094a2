//! Out-of-band control signals received over the room's data channel.
//!
//! Signals are UTF-8 JSON objects tagged by a `type` field, for example
//! `{"type":"interrupt"}`. Unknown tags are valid signals that carry no
//! action; anything that is not a tagged JSON object is malformed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlSignal {
    /// Halt the response currently being generated.
    Interrupt,
    /// The learner raised their hand.
    HandRaise,
    /// The learner lowered their hand.
    HandLower,
    /// A well-formed signal with a tag this session does not act on.
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("signal payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("malformed signal payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decodes a raw data-channel payload.
pub fn parse_signal(payload: &[u8]) -> Result<ControlSignal, SignalError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}
