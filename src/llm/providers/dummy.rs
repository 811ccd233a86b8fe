//! Dummy provider: echoes the latest user line back, word by word, prefixed
//! with `[echo]`, or plays a fixed script. Lets both shells run without a
//! model file and gives tests a deterministic fragment source.

use std::sync::Arc;
use std::time::Duration;

use crate::llm::stream::{self, FragmentStream};
use crate::llm::{GenerationConfig, ProviderError};

#[derive(Debug, Clone)]
enum Step {
    Text(String),
    Malformed,
}

#[derive(Debug, Clone, Default)]
pub struct DummyProvider {
    script: Option<Arc<[Step]>>,
    delay: Duration,
}

impl DummyProvider {
    /// Echo mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Play `fragments` verbatim for every prompt.
    pub fn scripted<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps: Vec<Step> = fragments.into_iter().map(|f| Step::Text(f.into())).collect();
        Self { script: Some(steps.into()), delay: Duration::ZERO }
    }

    /// Insert a malformed fragment after the first `n` scripted fragments.
    pub fn malformed_after(mut self, n: usize) -> Self {
        let mut steps: Vec<Step> = self.script.as_deref().map(<[Step]>::to_vec).unwrap_or_default();
        steps.insert(n.min(steps.len()), Step::Malformed);
        self.script = Some(steps.into());
        self
    }

    /// Sleep this long before each fragment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn generate(&self, prompt: &str, config: &GenerationConfig) -> FragmentStream {
        let steps = match &self.script {
            Some(script) => script.to_vec(),
            None => echo_steps(prompt),
        };
        let max_tokens = config.max_tokens as usize;
        let delay = self.delay;
        let (tx, stream) = stream::channel(&config.stop_sequences);

        tokio::spawn(async move {
            for step in steps.into_iter().take(max_tokens) {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let item = match step {
                    Step::Text(text) => Ok(text),
                    Step::Malformed => Err(ProviderError::MalformedFragment("scripted".into())),
                };
                if tx.send(item).await.is_err() {
                    tracing::debug!("dummy: consumer went away");
                    break;
                }
            }
        });
        stream
    }
}

/// `[echo] <last user line>` split into word-sized fragments.
fn echo_steps(prompt: &str) -> Vec<Step> {
    let last_user = prompt
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix("User: "))
        .unwrap_or("");
    let line = format!("[echo] {last_user}");
    line.trim_end()
        .split_inclusive(' ')
        .map(|w| Step::Text(w.to_string()))
        .collect()
}
