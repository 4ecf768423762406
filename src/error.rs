//! Error types for audio-caption-rs.

use std::fmt;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Tokenizer error.
    #[error("tokenizer: {0}")]
    Tokenizer(TokenizerError),

    /// Audio decoding or resampling error.
    #[error("audio: {0}")]
    Audio(String),

    /// Dataset construction failed (caption join miss, empty caption,
    /// vocabulary miss). Never recovered: a dropped sample would shift
    /// every per-file index after it.
    #[error("dataset: {0}")]
    Dataset(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// Loss became NaN or infinite.
    #[error("non-finite loss {loss} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, loss: f32 },

    /// The external metrics provider failed or returned an unusable result.
    #[error("metrics: {0}")]
    Metrics(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Caption table parse error.
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    /// HuggingFace Hub error.
    #[error("hf-hub: {0}")]
    HfHub(String),
}

/// Wrapper for tokenizer errors (tokenizers::Error doesn't impl std::error::Error).
#[derive(Debug)]
pub struct TokenizerError(pub String);

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<tokenizers::Error> for Error {
    fn from(error: tokenizers::Error) -> Self {
        Error::Tokenizer(TokenizerError(error.to_string()))
    }
}

impl From<hound::Error> for Error {
    fn from(error: hound::Error) -> Self {
        Error::Audio(error.to_string())
    }
}

impl From<hf_hub::api::sync::ApiError> for Error {
    fn from(error: hf_hub::api::sync::ApiError) -> Self {
        Error::HfHub(error.to_string())
    }
}
