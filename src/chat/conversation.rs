//! The single conversation: history, fact memory, pending queue, and the
//! in-flight turn.
//!
//! States:
//!
//! ```text
//!          begin_turn                       finish_turn
//!   Idle ─────────────▶ Streaming ──────────────────────▶ Idle
//!                        │  ▲  push_fragment               (note "Stopped." if
//!                        └──┘                               a stop was requested)
//! ```
//!
//! Everything here is synchronous; the [`TurnController`](super::TurnController)
//! decides when each transition happens.

use std::collections::VecDeque;

use super::{ChatTurn, Role, STOPPED_NOTE, TIMED_OUT_NOTE, prompt};
use crate::facts::FactStore;

/// A user submission waiting for its turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInput {
    pub text: String,
    /// The user entry was appended when the input was queued.
    pub already_added: bool,
}

/// What [`Conversation::submit`] did with the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Nothing in flight: the caller should start this turn now.
    Start(PendingInput),
    /// A turn is streaming: the user entry is already visible and the input
    /// waits in the queue.
    Queued,
    /// Blank input.
    Ignored,
}

/// How the fragment stream of a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEnd {
    /// Stream exhausted, or abandoned after a stop request.
    Exhausted,
    /// No fragment arrived within the configured window.
    TimedOut,
    /// The adapter failed; the message is shown to the user as a note.
    Failed(String),
}

#[derive(Debug)]
struct ActiveTurn {
    /// Index of the placeholder assistant entry in `history`.
    placeholder: usize,
    stop_requested: bool,
}

#[derive(Debug, Default)]
pub struct Conversation {
    history: Vec<ChatTurn>,
    facts: FactStore,
    pending: VecDeque<PendingInput>,
    active: Option<ActiveTurn>,
    revision: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept user text. While a turn streams, the user entry is appended
    /// immediately and the input is queued behind the current turn.
    pub fn submit(&mut self, text: &str) -> Submission {
        let text = text.trim();
        if text.is_empty() {
            return Submission::Ignored;
        }
        if self.active.is_none() {
            return Submission::Start(PendingInput { text: text.to_string(), already_added: false });
        }
        self.push_user(text);
        self.pending.push_back(PendingInput { text: text.to_string(), already_added: true });
        self.touch();
        Submission::Queued
    }

    /// Start a turn: append the user entry (unless queued earlier), record
    /// its fact, build the prompt from the history so far, then append the
    /// empty assistant placeholder. Returns the prompt.
    pub fn begin_turn(&mut self, input: &PendingInput) -> String {
        debug_assert!(self.active.is_none(), "begin_turn while a turn is in flight");
        if !input.already_added {
            self.push_user(&input.text);
        }
        let prompt_history: Vec<ChatTurn> = self
            .history
            .iter()
            .filter(|t| t.role != Role::Note)
            .cloned()
            .collect();
        let prompt = prompt::build(&prompt_history, &self.facts);

        self.history.push(ChatTurn::assistant(""));
        self.active = Some(ActiveTurn { placeholder: self.history.len() - 1, stop_requested: false });
        self.touch();
        prompt
    }

    /// Append a fragment to the placeholder entry, in place.
    pub fn push_fragment(&mut self, fragment: &str) {
        let Some(active) = &self.active else {
            return;
        };
        if let Some(turn) = self.history.get_mut(active.placeholder) {
            turn.content.push_str(fragment);
            self.touch();
        }
    }

    /// Ask the in-flight turn to stop at its next fragment boundary.
    /// Returns `false` when nothing is streaming.
    pub fn request_stop(&mut self) -> bool {
        match &mut self.active {
            Some(active) => {
                active.stop_requested = true;
                true
            }
            None => false,
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.stop_requested)
    }

    /// Drain the in-flight turn and return to idle. Returns `true` when the
    /// turn was stopped by request.
    pub fn finish_turn(&mut self, end: TurnEnd) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        match end {
            TurnEnd::Exhausted => {
                if !active.stop_requested {
                    if let Some(turn) = self.history.get_mut(active.placeholder) {
                        let trimmed = turn.content.trim_end().len();
                        turn.content.truncate(trimmed);
                        // A reply with no text leaves nothing to show.
                        if turn.content.is_empty() {
                            self.history.remove(active.placeholder);
                        }
                    }
                }
            }
            TurnEnd::TimedOut => self.history.push(ChatTurn::note(TIMED_OUT_NOTE)),
            TurnEnd::Failed(message) => {
                // An empty placeholder carries nothing; the note replaces it.
                if self
                    .history
                    .get(active.placeholder)
                    .is_some_and(|t| t.content.is_empty())
                {
                    self.history.remove(active.placeholder);
                }
                self.history.push(ChatTurn::note(message));
            }
        }
        if active.stop_requested {
            self.history.push(ChatTurn::note(STOPPED_NOTE));
        }
        self.touch();
        active.stop_requested
    }

    /// Next queued input, oldest first.
    pub fn next_pending(&mut self) -> Option<PendingInput> {
        let next = self.pending.pop_front();
        if next.is_some() {
            self.touch();
        }
        next
    }

    /// Clear history, facts, the queue, and all flags.
    pub fn reset(&mut self) {
        self.history.clear();
        self.facts.reset();
        self.pending.clear();
        self.active = None;
        self.touch();
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Content of the in-flight placeholder, if a turn is streaming.
    pub fn streaming_text(&self) -> Option<&str> {
        let active = self.active.as_ref()?;
        self.history.get(active.placeholder).map(|t| t.content.as_str())
    }

    /// Bumped on every mutation; lets pollers skip unchanged snapshots.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn push_user(&mut self, text: &str) {
        self.history.push(ChatTurn::user(text));
        self.facts.consider(text);
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(conv: &mut Conversation, text: &str) -> String {
        match conv.submit(text) {
            Submission::Start(input) => conv.begin_turn(&input),
            other => panic!("expected Start, got {other:?}"),
        }
    }

    fn roles(conv: &Conversation) -> Vec<Role> {
        conv.history().iter().map(|t| t.role).collect()
    }

    #[test]
    fn blank_input_is_ignored() {
        let mut conv = Conversation::new();
        assert_eq!(conv.submit("   "), Submission::Ignored);
        assert!(conv.history().is_empty());
    }

    #[test]
    fn idle_submit_returns_start_without_touching_history() {
        let mut conv = Conversation::new();
        let sub = conv.submit("  hi  ");
        assert_eq!(sub, Submission::Start(PendingInput { text: "hi".into(), already_added: false }));
        assert!(conv.history().is_empty());
    }

    #[test]
    fn begin_turn_appends_user_and_placeholder_and_hides_placeholder_from_prompt() {
        let mut conv = Conversation::new();
        let prompt = start(&mut conv, "hi");
        assert_eq!(roles(&conv), [Role::User, Role::Assistant]);
        assert_eq!(conv.history()[1].content, "");
        assert!(prompt.ends_with("User: hi\n\n### Response:\n"));
        assert!(conv.is_streaming());
    }

    #[test]
    fn begin_turn_records_fact_before_building_prompt() {
        let mut conv = Conversation::new();
        let prompt = start(&mut conv, "Paris is a city in France.");
        assert_eq!(conv.facts().all(), ["Paris is a city in France"]);
        assert!(prompt.starts_with("### Memory:\n- Paris is a city in France\n\n### Instruction:"));
    }

    #[test]
    fn fragments_mutate_placeholder_in_place() {
        let mut conv = Conversation::new();
        start(&mut conv, "hi");
        let id = conv.history()[1].id;
        conv.push_fragment("Hel");
        conv.push_fragment("lo ");
        assert_eq!(conv.history().len(), 2);
        assert_eq!(conv.history()[1].id, id);
        assert_eq!(conv.streaming_text(), Some("Hello "));
        assert!(!conv.finish_turn(TurnEnd::Exhausted));
        assert_eq!(conv.history()[1].content, "Hello");
        assert!(!conv.is_streaming());
    }

    #[test]
    fn submit_while_streaming_appends_user_and_queues() {
        let mut conv = Conversation::new();
        start(&mut conv, "hi");
        assert_eq!(conv.submit("there"), Submission::Queued);
        assert_eq!(roles(&conv), [Role::User, Role::Assistant, Role::User]);
        assert_eq!(conv.pending_len(), 1);

        // Fragments still land in the placeholder, not the queued user entry.
        conv.push_fragment("hey");
        assert_eq!(conv.history()[1].content, "hey");
        assert_eq!(conv.history()[2].content, "there");
    }

    #[test]
    fn queued_input_is_not_appended_twice() {
        let mut conv = Conversation::new();
        start(&mut conv, "hi");
        conv.submit("Rome is a city in Italy");
        conv.finish_turn(TurnEnd::Exhausted);

        let next = conv.next_pending().unwrap();
        assert!(next.already_added);
        conv.begin_turn(&next);
        assert_eq!(roles(&conv), [Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(conv.facts().len(), 1);
        assert!(conv.next_pending().is_none());
    }

    #[test]
    fn stop_keeps_text_and_appends_note() {
        let mut conv = Conversation::new();
        start(&mut conv, "hi");
        conv.push_fragment("partial ");
        assert!(conv.request_stop());
        assert!(conv.stop_requested());
        assert!(conv.finish_turn(TurnEnd::Exhausted));
        assert_eq!(conv.history()[1].content, "partial ");
        assert_eq!(conv.history()[2], ChatTurn { id: conv.history()[2].id, role: Role::Note, content: STOPPED_NOTE.into() });
        assert!(!conv.stop_requested());
    }

    #[test]
    fn request_stop_when_idle_is_a_no_op() {
        let mut conv = Conversation::new();
        assert!(!conv.request_stop());
    }

    #[test]
    fn notes_never_reach_the_prompt() {
        let mut conv = Conversation::new();
        start(&mut conv, "hi");
        conv.request_stop();
        conv.finish_turn(TurnEnd::Exhausted);
        let prompt = start(&mut conv, "again");
        assert!(!prompt.contains(STOPPED_NOTE));
    }

    #[test]
    fn failure_replaces_empty_placeholder_with_note() {
        let mut conv = Conversation::new();
        start(&mut conv, "hi");
        conv.submit("queued");
        conv.finish_turn(TurnEnd::Failed("model not found: m.gguf".into()));
        assert_eq!(roles(&conv), [Role::User, Role::User, Role::Note]);
        assert_eq!(conv.history()[2].content, "model not found: m.gguf");
    }

    #[test]
    fn empty_reply_leaves_no_placeholder_behind() {
        let mut conv = Conversation::new();
        start(&mut conv, "one");
        conv.submit("two");
        conv.submit("three");
        conv.push_fragment("  ");
        conv.finish_turn(TurnEnd::Exhausted);
        while let Some(next) = conv.next_pending() {
            conv.begin_turn(&next);
            conv.finish_turn(TurnEnd::Exhausted);
        }
        assert_eq!(roles(&conv), [Role::User, Role::User, Role::User]);
        let adjacent_empty = conv.history().windows(2).any(|w| {
            w.iter().all(|t| t.role == Role::Assistant && t.content.is_empty())
        });
        assert!(!adjacent_empty);
    }

    #[test]
    fn stop_before_any_text_keeps_placeholder_and_note() {
        let mut conv = Conversation::new();
        start(&mut conv, "hi");
        conv.request_stop();
        conv.finish_turn(TurnEnd::Exhausted);
        assert_eq!(roles(&conv), [Role::User, Role::Assistant, Role::Note]);
    }

    #[test]
    fn timeout_appends_note() {
        let mut conv = Conversation::new();
        start(&mut conv, "hi");
        conv.finish_turn(TurnEnd::TimedOut);
        assert_eq!(conv.history().last().unwrap().content, TIMED_OUT_NOTE);
    }

    #[test]
    fn reset_clears_everything_from_any_state() {
        let mut conv = Conversation::new();
        start(&mut conv, "Paris is a city");
        conv.submit("more");
        conv.request_stop();
        conv.reset();
        assert!(conv.history().is_empty());
        assert!(conv.facts().is_empty());
        assert_eq!(conv.pending_len(), 0);
        assert!(!conv.is_streaming());
        assert!(!conv.stop_requested());
    }

    #[test]
    fn revision_moves_on_every_mutation() {
        let mut conv = Conversation::new();
        let r0 = conv.revision();
        start(&mut conv, "hi");
        let r1 = conv.revision();
        assert!(r1 > r0);
        conv.push_fragment("x");
        assert!(conv.revision() > r1);
    }
}
