//! Real-time voice model providers.
//!
//! A provider implements the core `ModelProvider` seam. It builds a model for
//! one room from the composed instructions, streams the learner's audio in
//! and relays the model's audio and transcripts back out.

pub mod openai;

pub use openai::OpenAIRealtimeProvider;
