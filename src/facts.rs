//! Ad-hoc fact memory.
//!
//! A single case-insensitive pattern pulls `"<subject> is a/an/the <predicate>"`
//! statements out of user input. It is a best-effort heuristic: it misses
//! plenty of real facts and happily stores junk. The store only grows, or is
//! wholly cleared by [`FactStore::reset`].

use once_cell::sync::Lazy;
use regex::Regex;

/// How many facts the prompt and the `/memory` listing show.
pub const RECENT_FACTS: usize = 10;

static FACT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([A-Za-z0-9 _-]{2,80})\s+is\s+(an?|the)\s+(.{2,120})\s*$")
        .expect("fact pattern is a valid regex")
});

/// Extract a fact from one line of user input, if it matches the pattern.
///
/// The subject is the first group, the predicate the third with trailing
/// periods removed.
pub fn extract(text: &str) -> Option<String> {
    let caps = FACT_PATTERN.captures(text.trim())?;
    let subject = caps.get(1)?.as_str().trim();
    let predicate = caps.get(3)?.as_str().trim().trim_end_matches('.');
    Some(format!("{subject} is {predicate}"))
}

/// Ordered, exact-string deduplicated list of facts.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    facts: Vec<String>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the fact contained in `text`, if any. Returns `true` when a new
    /// fact was stored.
    pub fn consider(&mut self, text: &str) -> bool {
        let Some(fact) = extract(text) else {
            return false;
        };
        if self.facts.iter().any(|f| *f == fact) {
            return false;
        }
        tracing::debug!(%fact, "fact stored");
        self.facts.push(fact);
        true
    }

    /// All facts, oldest first.
    pub fn all(&self) -> &[String] {
        &self.facts
    }

    /// The last [`RECENT_FACTS`] facts, oldest of those first.
    pub fn recent(&self) -> &[String] {
        let start = self.facts.len().saturating_sub(RECENT_FACTS);
        &self.facts[start..]
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn reset(&mut self) {
        self.facts.clear();
    }
}
