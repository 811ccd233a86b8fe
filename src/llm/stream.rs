//! Consumer-side shaping of the raw fragment channel.
//!
//! Providers push raw pieces into a bounded channel; [`FragmentStream`]
//! applies the stop sequences and the first-fragment trim before handing text
//! to the caller. Dropping the stream (or hitting a stop sequence) closes the
//! channel, which is how the producer learns to stop generating.

use tokio::sync::mpsc;

use super::ProviderError;

/// Capacity of the provider → stream channel. Kept at one so the producer
/// never runs more than a fragment ahead of the consumer.
pub const FRAGMENT_BUFFER: usize = 1;

/// Role label some models echo at the start of a response.
const ROLE_LABEL: &str = "Assistant:";

pub type RawFragment = Result<String, ProviderError>;

/// Create a connected producer/consumer pair.
pub fn channel(stop_sequences: &[String]) -> (mpsc::Sender<RawFragment>, FragmentStream) {
    let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
    (tx, FragmentStream::new(rx, stop_sequences))
}

/// Lazy, finite, non-restartable sequence of generated text fragments.
pub struct FragmentStream {
    rx: Option<mpsc::Receiver<RawFragment>>,
    stops: StopScanner,
    lead: LeadTrim,
}

impl FragmentStream {
    pub fn new(rx: mpsc::Receiver<RawFragment>, stop_sequences: &[String]) -> Self {
        Self {
            rx: Some(rx),
            stops: StopScanner::new(stop_sequences),
            lead: LeadTrim::default(),
        }
    }

    /// Next non-empty fragment, an adapter error, or `None` once generation
    /// is over.
    pub async fn next(&mut self) -> Option<RawFragment> {
        loop {
            let Some(rx) = self.rx.as_mut() else {
                // Channel gone: release whatever the stop scanner held back.
                let rest = self.stops.flush();
                return self.lead.apply(rest).map(Ok);
            };
            match rx.recv().await {
                Some(Ok(piece)) => {
                    let (text, halted) = self.stops.feed(&piece);
                    if halted {
                        self.rx = None;
                    }
                    if let Some(text) = self.lead.apply(text) {
                        return Some(Ok(text));
                    }
                    if halted {
                        return None;
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => self.rx = None,
            }
        }
    }
}

/// Holds back text that could still turn into a stop sequence, and cuts the
/// output at the first complete one.
#[derive(Debug)]
struct StopScanner {
    stops: Vec<String>,
    held: String,
    halted: bool,
}

impl StopScanner {
    fn new(stops: &[String]) -> Self {
        Self {
            stops: stops.iter().filter(|s| !s.is_empty()).cloned().collect(),
            held: String::new(),
            halted: false,
        }
    }

    /// Feed one raw piece. Returns the text safe to emit and whether a stop
    /// sequence was hit.
    fn feed(&mut self, piece: &str) -> (String, bool) {
        if self.halted {
            return (String::new(), true);
        }
        self.held.push_str(piece);

        if let Some(idx) = self.stops.iter().filter_map(|s| self.held.find(s.as_str())).min() {
            let out = self.held[..idx].to_string();
            self.held.clear();
            self.halted = true;
            return (out, true);
        }

        let emit_to = self.held.len() - self.partial_suffix_len();
        let out: String = self.held.drain(..emit_to).collect();
        (out, false)
    }

    /// Length of the longest suffix of `held` that is a proper prefix of
    /// some stop sequence.
    fn partial_suffix_len(&self) -> usize {
        for (i, _) in self.held.char_indices() {
            let suffix = &self.held[i..];
            if self
                .stops
                .iter()
                .any(|s| s.len() > suffix.len() && s.starts_with(suffix))
            {
                return self.held.len() - i;
            }
        }
        0
    }

    fn flush(&mut self) -> String {
        std::mem::take(&mut self.held)
    }
}

/// First-fragment cleanup: leading whitespace and one `Assistant:` label.
#[derive(Debug, Default)]
struct LeadTrim {
    done: bool,
}

impl LeadTrim {
    fn apply(&mut self, text: String) -> Option<String> {
        if text.is_empty() {
            return None;
        }
        if self.done {
            return Some(text);
        }
        self.done = true;
        let mut rest = text.trim_start();
        if let Some(stripped) = rest.strip_prefix(ROLE_LABEL) {
            rest = stripped.trim_start();
        }
        (!rest.is_empty()).then(|| rest.to_string())
    }
}
