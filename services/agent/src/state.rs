//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the configuration
//! and the content store shared by every tutoring session.

use crate::config::Config;
use lectern_core::content::ContentAccessor;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub content: Arc<dyn ContentAccessor>,
}
