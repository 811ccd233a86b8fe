//! Application-wide error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::llm::ProviderError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("model not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("inference error: {0}")]
    Provider(ProviderError),

    #[error("chat error: {0}")]
    Chat(String),

    #[error("web error: {0}")]
    Web(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProviderError> for AppError {
    /// A missing model keeps its own variant so shells can tell it apart
    /// from every other inference failure.
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::ModelNotFound(path) => AppError::ModelNotFound(path),
            other => AppError::Provider(other),
        }
    }
}
