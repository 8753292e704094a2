use crate::{content::ContentAccessor, mode::SessionMode, transcript::TranscriptWriter};
use std::sync::Arc;

/// Generic configuration for constructing a conversational model with any provider.
#[derive(Clone)]
pub struct GenericSessionConfig {
    /// The composed instruction string.
    pub instructions: String,
    /// The session mode; decides whether the learner's voice may cut the tutor off.
    pub mode: SessionMode,
    /// Content backing the `studyMaterial` tool.
    pub study_material: Arc<dyn ContentAccessor>,
    /// Where the provider records learner and tutor speech, if anywhere.
    pub transcript: Option<Arc<TranscriptWriter>>,
}

/// Who authored a conversation item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRole {
    System,
    User,
    Assistant,
}

/// A text message injected into a running conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationItem {
    pub role: ItemRole,
    pub text: String,
}

impl ConversationItem {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ItemRole::Assistant,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ItemRole::System,
            text: text.into(),
        }
    }
}

/// Generic events that any real-time provider can emit back to the room.
#[derive(Debug, Clone, PartialEq)]
pub enum GenericServerEvent {
    /// A transcription of the user's speech.
    Transcription { text: String, is_final: bool },
    /// A chunk of spoken audio from the AI (base64 encoded).
    AudioChunk(String),
    /// A signal that the AI is about to start speaking.
    Speaking,
    /// A signal that the AI has finished speaking.
    SpeakingDone,
    /// The in-flight response was cancelled; buffered audio should be dropped.
    Interrupted,
    /// An error from the provider.
    Error(String),
}
