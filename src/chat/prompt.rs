//! Instruction/response prompt assembly.
//!
//! ```text
//! ### Memory:              ← only when facts exist, last 10, oldest first
//! - <fact>
//!
//! ### Instruction:         ← one block per user turn, system text repeated
//! <system instruction>
//!
//! User: <content>
//!
//! ### Response:
//! <assistant content>      ← followed by a blank line
//! ```
//!
//! The system instruction is re-emitted for every user turn, so the prompt
//! grows linearly with the conversation. Nothing here caps it; a prompt that
//! outgrows the context window fails at the inference adapter.

use super::{ChatTurn, Role};
use crate::facts::FactStore;

/// Fixed system instruction embedded in every instruction block.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. \
Answer only the user's question, concisely. \
Do not add any extra text, examples, or unrelated content. \
If you don't know, say you don't know.";

/// Fluent builder over a single output buffer.
pub struct PromptBuilder {
    system: String,
    out: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::with_system(SYSTEM_PROMPT)
    }

    /// Use a different system instruction for the instruction blocks.
    pub fn with_system(system: impl Into<String>) -> Self {
        Self { system: system.into(), out: String::new() }
    }

    /// Append the `### Memory:` section. No-op for an empty slice.
    pub fn memory(mut self, facts: &[String]) -> Self {
        if facts.is_empty() {
            return self;
        }
        self.out.push_str("### Memory:\n");
        for fact in facts {
            self.out.push_str("- ");
            self.out.push_str(fact);
            self.out.push('\n');
        }
        self.out.push('\n');
        self
    }

    /// Append one block per turn. Notes never reach the model.
    pub fn turns<'a, I>(mut self, turns: I) -> Self
    where
        I: IntoIterator<Item = &'a ChatTurn>,
    {
        for turn in turns {
            match turn.role {
                Role::User => {
                    self.out.push_str("### Instruction:\n");
                    self.out.push_str(&self.system);
                    self.out.push_str("\n\nUser: ");
                    self.out.push_str(&turn.content);
                    self.out.push_str("\n\n### Response:\n");
                }
                Role::Assistant => {
                    self.out.push_str(&turn.content);
                    self.out.push_str("\n\n");
                }
                Role::Note => {}
            }
        }
        self
    }

    pub fn build(self) -> String {
        self.out
    }
}

/// Build the prompt for `history` (which must not contain the in-flight
/// placeholder) with the most recent facts from `facts`.
pub fn build(history: &[ChatTurn], facts: &FactStore) -> String {
    PromptBuilder::new()
        .memory(facts.recent())
        .turns(history)
        .build()
}
