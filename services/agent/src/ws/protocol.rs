//! Defines the WebSocket message protocol between the browser client and the agent.

use lectern_core::generic_types::GenericServerEvent;
use serde::{Deserialize, Serialize};

/// Messages sent from the client (browser) to the server before it joins.
///
/// After the join, text frames are data-channel packets and binary frames are
/// PCM16 audio; neither is decoded as a `ClientMessage`.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Joins the room. This must be the first message.
    Join {
        /// The learner's identity, e.g. `CIRCLE-4f2a`.
        identity: String,
        #[serde(default)]
        metadata: Option<String>,
    },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the join.
    Joined { room: String },
    /// Reports an error to the client.
    Error { message: String },
    /// An update on the user's speech-to-text transcription.
    TranscriptionUpdate { text: String, is_final: bool },
    /// A chunk of audio data (base64 encoded PCM16) for the AI's voice.
    AudioChunk { data: String },
    /// Signals that the AI has started speaking.
    AiSpeakingStart,
    /// Signals that the AI has finished speaking.
    AiSpeakingEnd,
    /// The AI's response was cut off; queued audio should be discarded.
    Interrupted,
}

impl From<GenericServerEvent> for ServerMessage {
    fn from(event: GenericServerEvent) -> Self {
        match event {
            GenericServerEvent::Transcription { text, is_final } => {
                ServerMessage::TranscriptionUpdate { text, is_final }
            }
            GenericServerEvent::AudioChunk(data) => ServerMessage::AudioChunk { data },
            GenericServerEvent::Speaking => ServerMessage::AiSpeakingStart,
            GenericServerEvent::SpeakingDone => ServerMessage::AiSpeakingEnd,
            GenericServerEvent::Interrupted => ServerMessage::Interrupted,
            GenericServerEvent::Error(message) => ServerMessage::Error { message },
        }
    }
}
