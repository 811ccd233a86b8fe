//! Inference adapter.
//!
//! `LlmProvider` is an enum over concrete runtime backends; the
//! [`InferenceAdapter`] memoizes one provider per process and hands out
//! [`FragmentStream`]s for prompts.
//!
//! Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
//! Adding a backend = new module + new variant + new `generate` arm.

pub mod providers;
pub mod stream;

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::ModelConfig;

pub use stream::{FragmentStream, RawFragment};

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("model not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("backend '{0}' is not available in this build")]
    UnknownBackend(String),
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("prompt is {prompt_tokens} tokens but the context window is {n_ctx}")]
    ContextExceeded { prompt_tokens: usize, n_ctx: usize },
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("malformed fragment: {0}")]
    MalformedFragment(String),
}

// ── Generation config ─────────────────────────────────────────────────────────

/// Sampling parameters for one generation. Fixed per shell, never derived
/// from conversation state.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub repeat_penalty: f32,
    pub stop_sequences: Vec<String>,
}

/// Markers that would start a new turn.
pub fn default_stop_sequences() -> Vec<String> {
    ["### Instruction:", "User:", "Assistant:"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl GenerationConfig {
    /// Short, near-deterministic answers for the console shell.
    pub fn console() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.2,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            stop_sequences: default_stop_sequences(),
        }
    }

    /// Longer, looser answers for the web shell.
    pub fn interactive() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 50,
            repeat_penalty: 1.05,
            stop_sequences: default_stop_sequences(),
        }
    }
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available runtime backends. Shared immutable capabilities; clone freely.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    #[cfg(feature = "backend-llama")]
    Llama(providers::llama::LlamaProvider),
}

impl LlmProvider {
    /// Start generating for `prompt`. Must be called inside a Tokio runtime;
    /// the work runs on its own task and stops when the stream is dropped.
    pub fn generate(&self, prompt: &str, config: &GenerationConfig) -> FragmentStream {
        match self {
            LlmProvider::Dummy(p) => p.generate(prompt, config),
            #[cfg(feature = "backend-llama")]
            LlmProvider::Llama(p) => p.generate(prompt, config),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            #[cfg(feature = "backend-llama")]
            LlmProvider::Llama(_) => "llama",
        }
    }
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// Lazily constructs the runtime handle on first use and keeps it for the
/// life of the process. Conversation resets never touch it.
pub struct InferenceAdapter {
    model: Option<ModelConfig>,
    handle: OnceCell<LlmProvider>,
}

impl InferenceAdapter {
    /// Adapter that will build the configured backend on first use.
    pub fn new(model: ModelConfig) -> Self {
        Self { model: Some(model), handle: OnceCell::new() }
    }

    /// Adapter around an already constructed provider.
    pub fn with_provider(provider: LlmProvider) -> Self {
        Self { model: None, handle: OnceCell::new_with(Some(provider)) }
    }

    /// The memoized runtime handle, constructing it on the first call.
    /// A failed construction is not cached, but nothing retries on its own.
    pub async fn get_handle(&self) -> Result<&LlmProvider, ProviderError> {
        self.handle
            .get_or_try_init(|| async {
                let model = self
                    .model
                    .as_ref()
                    .ok_or_else(|| ProviderError::Load("no model configured".into()))?;
                let provider = providers::build(model).await?;
                info!(backend = provider.name(), path = %model.path.display(), "runtime handle ready");
                Ok(provider)
            })
            .await
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.initialized()
    }

    /// Forward `prompt` and `config` to the runtime.
    pub async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<FragmentStream, ProviderError> {
        let provider = self.get_handle().await?;
        Ok(provider.generate(prompt, config))
    }
}
