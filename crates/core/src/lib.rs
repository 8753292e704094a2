//! Lesson planning and session orchestration for a voice-driven tutor.
//!
//! The crate turns a static body of study text into a lesson plan, composes
//! the instruction string a real-time conversational model is built with,
//! and drives one learner's session through its lifecycle. Networking lives
//! behind the `RoomTransport` and `ModelProvider` traits.

pub mod content;
pub mod generic_types;
pub mod mode;
pub mod plan;
pub mod prompt;
pub mod realtime;
pub mod room;
pub mod session;
pub mod signal;
pub mod tools;
pub mod transcript;

pub use content::{ContentAccessor, ContentError, FsContentStore, InMemoryContentStore};
pub use mode::SessionMode;
pub use plan::{LessonPlan, build_plan};
pub use prompt::PromptComposer;
pub use session::{SessionController, SessionError, SessionState};
