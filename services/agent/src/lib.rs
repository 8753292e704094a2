//! Lectern Agent Library Crate
//!
//! This library contains the deployable half of the tutor: configuration,
//! the WebSocket room transport, the OpenAI Realtime provider and routing.
//! The `lectern` binary is a thin wrapper around it.

pub mod audio_utils;
pub mod config;
pub mod router;
pub mod state;
pub mod ws;
