//! Error types for the docchat retrieval pipeline.
//!
//! Uses `thiserror` for a single structured error enum. Every variant carries
//! enough context (operation, path, counts) for a caller to report or retry.

use std::path::PathBuf;

/// Top-level error type for the docchat core library.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Nothing to index in {operation}: input was empty")]
    EmptyInput { operation: String },

    #[error("Corrupt index at {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Index file missing: {path}")]
    MissingFile { path: PathBuf },

    #[error("Embedding provider failed: {message}")]
    Embedding { message: String },

    #[error("Language model call failed: {message}")]
    Generation { message: String },

    #[error("Could not parse query variants: expected {expected}, found {found}")]
    ExpansionParse { expected: usize, found: usize },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Tokenizer error: {message}")]
    Tokenizer { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn empty_input(operation: impl Into<String>) -> Self {
        Self::EmptyInput {
            operation: operation.into(),
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Whether a persisted index failing with this error may be replaced by
    /// a fresh build instead of surfacing the failure.
    pub fn is_recoverable_index_error(&self) -> bool {
        matches!(
            self,
            Self::MissingFile { .. } | Self::CorruptIndex { .. } | Self::DimensionMismatch { .. }
        )
    }
}

/// A type alias for results using `RagError`.
pub type Result<T> = std::result::Result<T, RagError>;
