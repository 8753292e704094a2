//! Abstractions over a real-time conversational model.
//!
//! A `ModelProvider` constructs a model from the composed configuration; the
//! resulting `RealtimeModel` is then started against a participant and hands
//! back a `ConversationSession` through which the controller steers the
//! conversation.

use crate::{
    generic_types::{ConversationItem, GenericSessionConfig},
    room::Participant,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Constructs conversational models for new sessions.
pub trait ModelProvider: Send + Sync {
    fn construct(&self, config: GenericSessionConfig) -> Result<Box<dyn RealtimeModel>>;
}

/// A constructed, not yet running, conversational model.
#[async_trait]
pub trait RealtimeModel: Send + Sync {
    /// Starts the conversation for `participant`.
    async fn start(&self, participant: &Participant) -> Result<Arc<dyn ConversationSession>>;
}

/// A running conversation.
#[async_trait]
pub trait ConversationSession: Send + Sync {
    /// Enqueues an item into the conversation history without generating a reply.
    async fn create_item(&self, item: ConversationItem) -> Result<()>;

    /// Requests the model's next generated response.
    async fn create_response(&self) -> Result<()>;

    /// Cancels the response currently being generated, if any.
    async fn interrupt(&self) -> Result<()>;

    /// Allows or forbids the learner's speech to cut off a response in progress.
    async fn set_voice_interruptions(&self, _allowed: bool) -> Result<()> {
        Ok(())
    }

    /// Ends the conversation and releases provider resources.
    async fn close(&self) -> Result<()>;
}
