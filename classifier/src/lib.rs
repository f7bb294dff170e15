//! # Classifier
//!
//! Nearest-neighbor document classification on top of cached embeddings,
//! plus similarity reports over stored embedding records.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Document Classifier                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Document ──► EmbeddingCache ──► KnnClassifier ──► Prediction  │
//! │                     │                                           │
//! │                     ▼                                           │
//! │               *.json records ──► SimilarityAnalyzer ──► CSV     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsort_classifier::{ClassifierConfig, DocumentProcessor};
//!
//! let processor = DocumentProcessor::new(cache, &ClassifierConfig::default());
//! processor.train(training_docs).await;
//! let results = processor.classify(query_docs, CancellationToken::new()).await;
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod knn;
pub mod processor;
pub mod report;

pub use analysis::{PairwiseSimilarity, SimilarityAnalyzer, SimilarityMatrix};
pub use config::{ClassifierConfig, ProviderConfig};
pub use error::{ClassifierError, Result};
pub use knn::{KnnClassifier, Neighbor, Prediction, TrainingExample};
pub use processor::{
    Classification, ClassifiedDocument, Document, DocumentProcessor, TrainReport,
};
