//! In-process GGUF inference through llama.cpp.
//!
//! The model is loaded once, on a blocking thread, and shared behind an `Arc`.
//! Each `generate` call gets a fresh context so turns never share KV state.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use rand_core::{OsRng, RngCore};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::llm::stream::{self, FragmentStream, RawFragment};
use crate::llm::{GenerationConfig, ProviderError};

/// Tokens considered by the repetition penalty.
const PENALTY_LAST_N: i32 = 64;
const MIN_P: f32 = 0.05;

/// llama.cpp refuses a second backend init in the same process.
static BACKEND: OnceLock<LlamaBackend> = OnceLock::new();

fn backend() -> Result<&'static LlamaBackend, ProviderError> {
    if let Some(b) = BACKEND.get() {
        return Ok(b);
    }
    let b = LlamaBackend::init().map_err(|e| ProviderError::Load(format!("backend init: {e}")))?;
    Ok(BACKEND.get_or_init(|| b))
}

struct LlamaRuntime {
    model: LlamaModel,
    n_ctx: u32,
    n_threads: u32,
    seed: Option<u32>,
}

#[derive(Clone)]
pub struct LlamaProvider {
    runtime: Arc<LlamaRuntime>,
}

impl std::fmt::Debug for LlamaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaProvider")
            .field("n_ctx", &self.runtime.n_ctx)
            .field("n_threads", &self.runtime.n_threads)
            .finish_non_exhaustive()
    }
}

impl LlamaProvider {
    /// Load the GGUF file named by `model.path`.
    pub async fn load(model: &ModelConfig) -> Result<Self, ProviderError> {
        if !model.path.exists() {
            let abs = std::path::absolute(&model.path).unwrap_or_else(|_| model.path.clone());
            return Err(ProviderError::ModelNotFound(abs));
        }
        let path = model.path.clone();
        let n_gpu_layers = model.n_gpu_layers;
        info!(path = %path.display(), n_gpu_layers, "loading model");

        let loaded = tokio::task::spawn_blocking(move || load_model_sync(&path, n_gpu_layers))
            .await
            .map_err(|e| ProviderError::Load(format!("load task failed: {e}")))??;

        Ok(Self {
            runtime: Arc::new(LlamaRuntime {
                model: loaded,
                n_ctx: model.n_ctx,
                n_threads: model.n_threads,
                seed: model.seed,
            }),
        })
    }

    pub fn generate(&self, prompt: &str, config: &GenerationConfig) -> FragmentStream {
        let (tx, stream) = stream::channel(&config.stop_sequences);
        let runtime = self.runtime.clone();
        let prompt = prompt.to_string();
        let config = config.clone();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = run_generation(&runtime, &prompt, &config, &tx) {
                warn!(error = %e, "generation aborted");
                let _ = tx.blocking_send(Err(e));
            }
        });
        stream
    }
}

fn load_model_sync(path: &Path, n_gpu_layers: u32) -> Result<LlamaModel, ProviderError> {
    let backend = backend()?;
    let params = LlamaModelParams::default().with_n_gpu_layers(n_gpu_layers);
    LlamaModel::load_from_file(backend, path, &params)
        .map_err(|e| ProviderError::Load(e.to_string()))
}

fn build_sampler(config: &GenerationConfig, seed: u32) -> LlamaSampler {
    let mut samplers = Vec::new();
    if config.repeat_penalty != 1.0 {
        samplers.push(LlamaSampler::penalties(PENALTY_LAST_N, config.repeat_penalty, 0.0, 0.0));
    }
    if config.temperature <= 0.0 {
        samplers.push(LlamaSampler::greedy());
    } else {
        samplers.push(LlamaSampler::top_k(config.top_k));
        samplers.push(LlamaSampler::top_p(config.top_p, 1));
        samplers.push(LlamaSampler::min_p(MIN_P, 1));
        samplers.push(LlamaSampler::temp(config.temperature));
        samplers.push(LlamaSampler::dist(seed));
    }
    LlamaSampler::chain_simple(samplers)
}

/// Token budget for the answer: the configured cap, bounded by what is left
/// of the context window after the prompt.
fn output_budget(max_tokens: u32, n_ctx: u32, prompt_tokens: usize) -> Result<usize, ProviderError> {
    let n_ctx = n_ctx as usize;
    if prompt_tokens >= n_ctx {
        return Err(ProviderError::ContextExceeded { prompt_tokens, n_ctx });
    }
    Ok((max_tokens as usize).min(n_ctx - prompt_tokens))
}

fn run_generation(
    runtime: &LlamaRuntime,
    prompt: &str,
    config: &GenerationConfig,
    tx: &mpsc::Sender<RawFragment>,
) -> Result<(), ProviderError> {
    let model = &runtime.model;
    let tokens = model
        .str_to_token(prompt, AddBos::Always)
        .map_err(|e| ProviderError::Generation(format!("tokenize: {e}")))?;
    let budget = output_budget(config.max_tokens, runtime.n_ctx, tokens.len())?;

    let threads = runtime.n_threads as i32;
    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(runtime.n_ctx))
        .with_n_threads(threads)
        .with_n_threads_batch(threads);
    let mut ctx = model
        .new_context(backend()?, ctx_params)
        .map_err(|e| ProviderError::Generation(format!("context: {e}")))?;

    let n_batch = ctx.n_batch() as usize;
    for chunk in tokens.chunks(n_batch.max(1)) {
        let mut batch = LlamaBatch::get_one(chunk)
            .map_err(|e| ProviderError::Generation(format!("batch: {e}")))?;
        ctx.decode(&mut batch)
            .map_err(|e| ProviderError::Generation(format!("prefill: {e}")))?;
    }

    let seed = runtime.seed.unwrap_or_else(|| OsRng.next_u32());
    let mut sampler = build_sampler(config, seed);
    let mut decoder = encoding_rs::UTF_8.new_decoder();
    debug!(prompt_tokens = tokens.len(), budget, "prefill done");

    for _ in 0..budget {
        let token = sampler.sample(&ctx, -1);
        sampler.accept(token);
        if model.is_eog_token(token) {
            break;
        }

        match model.token_to_piece(token, &mut decoder, true, None) {
            Ok(piece) if piece.is_empty() => {}
            Ok(piece) => {
                if tx.blocking_send(Ok(piece)).is_err() {
                    debug!("consumer went away, stopping generation");
                    return Ok(());
                }
            }
            Err(e) => {
                if tx.blocking_send(Err(ProviderError::MalformedFragment(e.to_string()))).is_err() {
                    return Ok(());
                }
            }
        }

        let next: [LlamaToken; 1] = [token];
        let mut batch = LlamaBatch::get_one(&next)
            .map_err(|e| ProviderError::Generation(format!("batch: {e}")))?;
        ctx.decode(&mut batch)
            .map_err(|e| ProviderError::Generation(format!("decode: {e}")))?;
    }
    Ok(())
}
