//! Error types for classification and similarity reports.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for classifier operations.
pub type Result<T> = std::result::Result<T, ClassifierError>;

/// Errors that can occur while classifying or building reports.
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] docsort_embeddings::EmbeddingError),

    /// A stored embedding record could not be read.
    #[error("unreadable embedding record {}: {reason}", path.display())]
    InvalidRecord { path: PathBuf, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// CSV encoding error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
