use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GradeError {
    /// The embedding model could not be loaded. Fatal for the evaluation.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid answer key: {0}")]
    InvalidAnswerKey(String),

    #[error("recognition failed: {0}")]
    RecognitionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<candle_core::Error> for GradeError {
    fn from(err: candle_core::Error) -> Self {
        GradeError::Embedding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;
