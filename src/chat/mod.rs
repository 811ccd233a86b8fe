//! Conversation model and turn coordination.
//!
//! ```text
//! user text ─▶ Conversation::submit ─▶ facts ─▶ prompt::build ─▶ InferenceAdapter
//!                                                                     │
//!        history (placeholder mutated in place) ◀── fragments ◀───────┘
//! ```
//!
//! [`Conversation`] is the synchronous state machine; [`TurnController`] is
//! the async task that feeds it fragments and serialises overlapping input.

pub mod controller;
pub mod conversation;
pub mod prompt;

use serde::Serialize;
use uuid::Uuid;

pub use controller::{ChatCommand, ChatEvent, ChatHandle, TurnController};
pub use conversation::{Conversation, PendingInput, Submission, TurnEnd};

/// Content of the note appended when a turn is cancelled.
pub const STOPPED_NOTE: &str = "Stopped.";
/// Content of the note appended when the fragment timeout fires.
pub const TIMED_OUT_NOTE: &str = "Generation timed out.";

/// Who a history entry belongs to. `Note` entries are local annotations and
/// never reach the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Note,
}

/// One entry of the ordered conversation history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    /// Stable key for UIs that re-render the list.
    pub id: Uuid,
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { id: Uuid::now_v7(), role, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn note(content: impl Into<String>) -> Self {
        Self::new(Role::Note, content)
    }
}
