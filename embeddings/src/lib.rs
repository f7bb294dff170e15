//! # Embeddings
//!
//! Embedding generation, vector math and the on-disk embedding cache used by
//! the docsort classifier.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to dense vectors through an
//!   injected [`EmbeddingProvider`]
//! - **Vector Math**: Cosine similarity and chunk averaging
//! - **Caching**: One JSON record per document so repeated runs skip the
//!   provider entirely
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► EmbeddingCache            │
//! │       │                    │              │                     │
//! │       ▼                    ▼              ▼                     │
//! │  OpenAI (chunked)     similarity     EmbeddingRecord (*.json)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod provider;
pub mod record;
pub mod similarity;

pub use cache::EmbeddingCache;
pub use error::{EmbeddingError, Result};
pub use provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, OpenAIProvider};
pub use record::EmbeddingRecord;
pub use similarity::{average, cosine_similarity};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Label given to documents that are being classified rather than trained on.
pub const UNLABELED: &str = "unlabeled";
