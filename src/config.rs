//! Configuration loading with env-var overrides.
//!
//! Reads an optional TOML file (`config/default.toml`, or the path in
//! `HEARTH_CONFIG`), then applies the environment overrides `MODEL_PATH`,
//! `N_CTX`, `N_GPU_LAYERS`, `N_THREADS`, `HEARTH_BACKEND`,
//! `HEARTH_LOG_LEVEL`, `HEARTH_LOG_FILE` and `HEARTH_BIND`. Every value has a
//! fixed fallback default, so running with neither file nor env works.

use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;
use crate::llm::GenerationConfig;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Which inference runtime backs the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// llama.cpp over a local GGUF file.
    Llama,
    /// Echo backend; needs no model file.
    Dummy,
}

impl FromStr for Backend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llama" | "llama.cpp" | "gguf" => Ok(Backend::Llama),
            "dummy" | "echo" => Ok(Backend::Dummy),
            other => Err(AppError::Config(format!("unknown backend: '{other}'"))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Llama => f.write_str("llama"),
            Backend::Dummy => f.write_str("dummy"),
        }
    }
}

/// Model runtime construction parameters.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub backend: Backend,
    /// GGUF file (already `~`-expanded).
    pub path: PathBuf,
    /// Context window size in tokens.
    pub n_ctx: u32,
    /// Layers offloaded to the accelerator; `0` keeps everything on the CPU.
    pub n_gpu_layers: u32,
    pub n_threads: u32,
    /// Sampler seed; `None` draws a fresh one per generation.
    pub seed: Option<u32>,
}

impl ModelConfig {
    /// The model file a llama backend would load, as an absolute path, when
    /// that file is missing. The dummy backend never needs one.
    pub fn missing_model(&self) -> Option<PathBuf> {
        if self.backend != Backend::Llama || self.path.exists() {
            return None;
        }
        Some(std::path::absolute(&self.path).unwrap_or_else(|_| self.path.clone()))
    }
}

/// The two sampling presets, one per shell.
#[derive(Debug, Clone)]
pub struct GenerationProfiles {
    pub console: GenerationConfig,
    pub interactive: GenerationConfig,
    /// Give up on a generation when no fragment arrives within this window.
    pub fragment_timeout: Option<Duration>,
}

/// Web shell configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Socket address the HTTP listener binds to.
    pub bind: String,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub model: ModelConfig,
    pub generation: GenerationProfiles,
    pub web: WebConfig,
}

/// Environment values that override the file. Tests build this directly
/// instead of mutating the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub model_path: Option<String>,
    pub n_ctx: Option<String>,
    pub n_gpu_layers: Option<String>,
    pub n_threads: Option<String>,
    pub backend: Option<String>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub bind: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            model_path: env::var("MODEL_PATH").ok(),
            n_ctx: env::var("N_CTX").ok(),
            n_gpu_layers: env::var("N_GPU_LAYERS").ok(),
            n_threads: env::var("N_THREADS").ok(),
            backend: env::var("HEARTH_BACKEND").ok(),
            log_level: env::var("HEARTH_LOG_LEVEL").ok(),
            log_file: env::var("HEARTH_LOG_FILE").ok(),
            bind: env::var("HEARTH_BIND").ok(),
        }
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    chat: RawChat,
    #[serde(default)]
    model: RawModel,
    #[serde(default)]
    generation: RawGeneration,
    #[serde(default)]
    web: RawWeb,
}

#[derive(Deserialize)]
struct RawChat {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

impl Default for RawChat {
    fn default() -> Self {
        Self { log_level: default_log_level(), log_file: None }
    }
}

#[derive(Deserialize, Default)]
struct RawModel {
    backend: Option<String>,
    path: Option<String>,
    n_ctx: Option<u32>,
    n_gpu_layers: Option<u32>,
    n_threads: Option<u32>,
    seed: Option<u32>,
}

#[derive(Deserialize, Default)]
struct RawGeneration {
    #[serde(default)]
    console: RawPreset,
    #[serde(default)]
    interactive: RawPreset,
    fragment_timeout_secs: Option<u64>,
}

/// Every field optional: unset fields keep the preset's default.
#[derive(Deserialize, Default)]
struct RawPreset {
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<i32>,
    repeat_penalty: Option<f32>,
    stop_sequences: Option<Vec<String>>,
}

impl RawPreset {
    fn apply(self, mut base: GenerationConfig) -> GenerationConfig {
        if let Some(v) = self.max_tokens { base.max_tokens = v; }
        if let Some(v) = self.temperature { base.temperature = v; }
        if let Some(v) = self.top_p { base.top_p = v; }
        if let Some(v) = self.top_k { base.top_k = v; }
        if let Some(v) = self.repeat_penalty { base.repeat_penalty = v; }
        if let Some(v) = self.stop_sequences { base.stop_sequences = v; }
        base
    }
}

#[derive(Deserialize)]
struct RawWeb {
    #[serde(default = "default_bind")]
    bind: String,
}

impl Default for RawWeb {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_log_level() -> String { "warn".to_string() }
fn default_bind() -> String { "127.0.0.1:3000".to_string() }

pub const DEFAULT_MODEL_PATH: &str = "models/phi-2.Q4_K_M.gguf";
pub const DEFAULT_N_CTX: u32 = 2048;
pub const DEFAULT_N_GPU_LAYERS: u32 = 20;

/// Half the logical processors, never fewer than two.
pub fn default_n_threads() -> u32 {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cpus / 2).max(2) as u32
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `HEARTH_CONFIG` or `config/default.toml`, then apply
/// env-var overrides. The default file is optional; an explicitly named one
/// must exist.
pub fn load() -> Result<Config, AppError> {
    let overrides = EnvOverrides::from_env();
    match env::var("HEARTH_CONFIG") {
        Ok(path) => load_from(Some(Path::new(&path)), &overrides),
        Err(_) => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            let path = default.exists().then_some(default);
            load_from(path, &overrides)
        }
    }
}

/// Loader over an explicit (optional) file and overrides.
pub fn load_from(path: Option<&Path>, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let parsed: RawConfig = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
            toml::from_str(&raw)
                .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?
        }
        None => RawConfig::default(),
    };

    let backend = match overrides.backend.as_deref().or(parsed.model.backend.as_deref()) {
        Some(s) => s.parse()?,
        None => Backend::Llama,
    };
    let path_str = overrides
        .model_path
        .as_deref()
        .or(parsed.model.path.as_deref())
        .unwrap_or(DEFAULT_MODEL_PATH);

    let n_ctx = env_number("N_CTX", overrides.n_ctx.as_deref())?
        .or(parsed.model.n_ctx)
        .unwrap_or(DEFAULT_N_CTX);
    let n_gpu_layers = env_number("N_GPU_LAYERS", overrides.n_gpu_layers.as_deref())?
        .or(parsed.model.n_gpu_layers)
        .unwrap_or(DEFAULT_N_GPU_LAYERS);
    let n_threads = env_number("N_THREADS", overrides.n_threads.as_deref())?
        .or(parsed.model.n_threads)
        .unwrap_or_else(default_n_threads);

    if n_ctx == 0 {
        return Err(AppError::Config("n_ctx must be greater than zero".into()));
    }
    if n_threads == 0 {
        return Err(AppError::Config("n_threads must be greater than zero".into()));
    }

    let log_file = overrides
        .log_file
        .as_deref()
        .or(parsed.chat.log_file.as_deref())
        .map(expand_home);

    let log_level = overrides.log_level.clone().unwrap_or(parsed.chat.log_level);
    // Full directives ("hearth_chat=debug,warn") are checked by the filter at init.
    if !log_level.contains(['=', ',']) {
        crate::logger::parse_level(&log_level).map_err(|e| AppError::Config(e.to_string()))?;
    }

    Ok(Config {
        log_level,
        log_file,
        model: ModelConfig {
            backend,
            path: expand_home(path_str),
            n_ctx,
            n_gpu_layers,
            n_threads,
            seed: parsed.model.seed,
        },
        generation: GenerationProfiles {
            console: parsed.generation.console.apply(GenerationConfig::console()),
            interactive: parsed.generation.interactive.apply(GenerationConfig::interactive()),
            fragment_timeout: parsed
                .generation
                .fragment_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        },
        web: WebConfig {
            bind: overrides.bind.clone().unwrap_or(parsed.web.bind),
        },
    })
}

/// Parse a numeric env override; a present-but-invalid value is an error.
fn env_number(name: &str, value: Option<&str>) -> Result<Option<u32>, AppError> {
    value
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| AppError::Config(format!("invalid {name} '{v}': {e}")))
        })
        .transpose()
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── Presets ───────────────────────────────────────────────────────────────────

impl Config {
    /// Dummy backend, default presets, no file and no env. Used by tests and
    /// by callers embedding the library without a model.
    pub fn dummy() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            model: ModelConfig {
                backend: Backend::Dummy,
                path: PathBuf::from(DEFAULT_MODEL_PATH),
                n_ctx: DEFAULT_N_CTX,
                n_gpu_layers: 0,
                n_threads: 2,
                seed: Some(0),
            },
            generation: GenerationProfiles {
                console: GenerationConfig::console(),
                interactive: GenerationConfig::interactive(),
                fragment_timeout: None,
            },
            web: WebConfig { bind: default_bind() },
        }
    }
}
