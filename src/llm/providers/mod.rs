//! Runtime backend implementations.
//!
//! `build(model)` is the factory, called once by the
//! [`InferenceAdapter`](super::InferenceAdapter) on first use.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
#[cfg(feature = "backend-llama")]
pub mod llama;

use crate::config::{Backend, ModelConfig};
use crate::llm::{LlmProvider, ProviderError};

/// Construct an `LlmProvider` for the configured backend.
pub async fn build(model: &ModelConfig) -> Result<LlmProvider, ProviderError> {
    match model.backend {
        Backend::Dummy => Ok(LlmProvider::Dummy(dummy::DummyProvider::new())),
        #[cfg(feature = "backend-llama")]
        Backend::Llama => Ok(LlmProvider::Llama(llama::LlamaProvider::load(model).await?)),
        #[cfg(not(feature = "backend-llama"))]
        Backend::Llama => Err(ProviderError::UnknownBackend(Backend::Llama.to_string())),
    }
}
