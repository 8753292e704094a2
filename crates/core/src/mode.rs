//! Session Modes
//!
//! A session mode selects the instruction template and the interaction
//! affordances of one tutoring session. It is resolved once, when the
//! participant joins, from a prefix convention on the participant's mode key:
//! the text before the first `-` is looked up in `MODE_PREFIXES`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the mode prefix and the rest of a participant key.
pub const MODE_DELIMITER: char = '-';

/// The interaction style of a tutoring session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// The learner sets the pace and may interrupt at any time.
    #[default]
    SelfPaced,
    /// The tutor leads and verifies comprehension before moving on.
    ComprehensionCheck,
    /// The learner raises a hand before asking questions.
    HandRaise,
}

/// The complete prefix table. Keys are matched case-insensitively.
pub const MODE_PREFIXES: &[(&str, SessionMode)] = &[
    ("SQUARE", SessionMode::SelfPaced),
    ("CIRCLE", SessionMode::ComprehensionCheck),
    ("TRIANGLE", SessionMode::HandRaise),
];

impl SessionMode {
    /// Looks up a bare prefix in the mode table.
    pub fn lookup(prefix: &str) -> Option<Self> {
        MODE_PREFIXES
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(prefix.trim()))
            .map(|(_, mode)| *mode)
    }

    /// Resolves the mode for a participant key such as `CIRCLE-4f2a`.
    ///
    /// Empty, malformed or unrecognised keys resolve to the default mode.
    pub fn from_key(key: &str) -> Self {
        let prefix = key.split(MODE_DELIMITER).next().unwrap_or_default();
        Self::lookup(prefix).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::SelfPaced => "self_paced",
            SessionMode::ComprehensionCheck => "comprehension_check",
            SessionMode::HandRaise => "hand_raise",
        }
    }

    /// Whether the learner has to raise a hand before the tutor yields.
    pub fn gates_on_hand_raise(&self) -> bool {
        matches!(self, SessionMode::HandRaise)
    }

    /// The mode-specific sentence of the welcome utterance.
    pub fn greeting(&self) -> &'static str {
        match self {
            SessionMode::SelfPaced => {
                "I'll walk you through the material, and it's up to you to interrupt me whenever you have a question."
            }
            SessionMode::ComprehensionCheck => {
                "I'll be leading today, and I'll check that each idea has landed before we move on."
            }
            SessionMode::HandRaise => {
                "Feel free to raise your hand when you have a question so that I may call on you."
            }
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
