//! The persisted embedding record.
//!
//! One record is stored per document as `<storage key>.json`. The same format
//! is read back by the cache and by the similarity reports, so both go
//! through [`EmbeddingRecord`].

use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// An embedding as stored on disk.
///
/// Every field is optional on read. Older files written with `Filename`,
/// `Label` and `Vector` keys are accepted as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Document identifier. Falls back to the file stem when absent.
    #[serde(
        default,
        alias = "Filename",
        alias = "filename",
        alias = "Identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub identifier: Option<String>,

    /// Category name for training documents, `unlabeled` for queries.
    #[serde(default, alias = "Label", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// The embedding vector.
    #[serde(default, alias = "Vector", alias = "embedding", alias = "Embedding")]
    pub vector: Option<Embedding>,
}

impl EmbeddingRecord {
    /// Create a record for a freshly computed embedding.
    pub fn new(identifier: impl Into<String>, vector: Embedding) -> Self {
        Self {
            identifier: Some(identifier.into()),
            label: None,
            vector: Some(vector),
        }
    }

    /// Attach a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The identifier, or `fallback` when the record does not carry one.
    pub fn identifier_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.identifier.as_deref().unwrap_or(fallback)
    }
}

/// Normalize a document identifier into a file-system safe storage key.
///
/// Whitespace and path separators become `_`, so `"Invoice 01/a.pdf"` is
/// stored as `"Invoice_01_a.pdf"`.
pub fn storage_key(identifier: &str) -> Result<String> {
    let key: String = identifier
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    if key.is_empty() || key == "." || key == ".." {
        return Err(EmbeddingError::InvalidIdentifier(identifier.to_string()));
    }

    Ok(key)
}
