//! Batch training and classification of documents.
//!
//! Documents are embedded through the shared [`EmbeddingCache`] with bounded
//! parallelism. A failure on one document is logged and recorded; it never
//! aborts the rest of the batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docsort_embeddings::{Embedding, EmbeddingCache, EmbeddingError};

use crate::config::ClassifierConfig;
use crate::error::Result;
use crate::knn::{KnnClassifier, Prediction, TrainingExample};

/// A document whose text has already been extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, usually the file name.
    pub identifier: String,

    /// Category for training documents.
    pub label: Option<String>,

    /// Extracted text.
    pub text: String,
}

impl Document {
    /// A labeled training document.
    pub fn training(
        identifier: impl Into<String>,
        label: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            label: Some(label.into()),
            text: text.into(),
        }
    }

    /// A document to classify.
    pub fn query(identifier: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            label: None,
            text: text.into(),
        }
    }
}

/// A document that could not be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub identifier: String,
    pub reason: String,
}

/// Summary of a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    /// Documents that made it into the training set.
    pub trained: usize,

    /// Documents skipped before embedding (blank text or no label).
    pub skipped: Vec<String>,

    /// Documents whose embedding failed.
    pub failed: Vec<DocumentFailure>,
}

/// What happened to one query document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Classification {
    /// The classifier produced a prediction (possibly the unknown result).
    Predicted(Prediction),

    /// Embedding failed; the document stays unclassified.
    Failed(String),

    /// The batch was cancelled before this document started.
    Cancelled,
}

/// One output row per input document, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedDocument {
    pub identifier: String,
    pub classification: Classification,
}

impl ClassifiedDocument {
    /// The prediction, if there is one.
    pub fn prediction(&self) -> Option<&Prediction> {
        match &self.classification {
            Classification::Predicted(prediction) => Some(prediction),
            Classification::Failed(_) | Classification::Cancelled => None,
        }
    }
}

/// Trains a [`KnnClassifier`] from documents and classifies new ones.
pub struct DocumentProcessor {
    cache: Arc<EmbeddingCache>,
    classifier: KnnClassifier,
    concurrency: usize,
    annotate_labels: bool,
}

impl DocumentProcessor {
    /// Create a processor with an unfit classifier.
    pub fn new(cache: Arc<EmbeddingCache>, config: &ClassifierConfig) -> Self {
        Self {
            cache,
            classifier: KnnClassifier::new(config.k),
            concurrency: config.concurrency.max(1),
            annotate_labels: config.annotate_labels,
        }
    }

    /// The underlying classifier.
    pub fn classifier(&self) -> &KnnClassifier {
        &self.classifier
    }

    /// The embedding cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed `documents` and fit the classifier on the ones that succeed.
    ///
    /// Replaces any previous training set.
    pub async fn train(&mut self, documents: Vec<Document>) -> TrainReport {
        let mut report = TrainReport::default();

        let mut usable = Vec::with_capacity(documents.len());
        for document in documents {
            if document.text.trim().is_empty() {
                warn!("Skipping {}: no text", document.identifier);
                report.skipped.push(document.identifier);
                continue;
            }
            let Some(label) = document.label.clone() else {
                warn!("Skipping {}: training document without label", document.identifier);
                report.skipped.push(document.identifier);
                continue;
            };
            usable.push((label, document));
        }

        let outcomes = self
            .embed_all(usable.iter().map(|(_, doc)| doc), &CancellationToken::new())
            .await;

        let mut training = Vec::with_capacity(usable.len());
        for ((label, document), outcome) in usable.into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(vector)) => {
                    self.annotate(&document.identifier, &label).await;
                    training.push(TrainingExample::new(label, document.identifier, vector));
                }
                Some(Err(e)) => {
                    warn!("Error embedding {}: {e}", document.identifier);
                    report.failed.push(DocumentFailure {
                        identifier: document.identifier,
                        reason: e.to_string(),
                    });
                }
                None => {}
            }
        }

        report.trained = training.len();
        self.classifier.fit(training);

        info!(
            "Trained on {} documents ({} skipped, {} failed), labels: {:?}",
            report.trained,
            report.skipped.len(),
            report.failed.len(),
            self.classifier.labels()
        );

        report
    }

    /// Classify `documents`, returning exactly one result per document in
    /// input order.
    ///
    /// `cancel` is checked before each document starts; documents that never
    /// started come back as [`Classification::Cancelled`].
    pub async fn classify(
        &self,
        documents: Vec<Document>,
        cancel: CancellationToken,
    ) -> Vec<ClassifiedDocument> {
        let outcomes = self.embed_all(documents.iter(), &cancel).await;

        let mut results = Vec::with_capacity(documents.len());
        for (document, outcome) in documents.into_iter().zip(outcomes) {
            let classification = match outcome {
                Some(Ok(vector)) => {
                    let prediction = self.classifier.predict(&vector);
                    info!(
                        "[{}] -> {} (score: {:.4}) | top: {}",
                        document.identifier,
                        prediction.label,
                        prediction.score,
                        prediction.top_neighbor
                    );
                    if !prediction.is_unknown() {
                        self.annotate(&document.identifier, &prediction.label).await;
                    }
                    Classification::Predicted(prediction)
                }
                Some(Err(e)) => {
                    warn!("Error classifying {}: {e}", document.identifier);
                    Classification::Failed(e.to_string())
                }
                None => Classification::Cancelled,
            };

            results.push(ClassifiedDocument {
                identifier: document.identifier,
                classification,
            });
        }

        let cancelled = results
            .iter()
            .filter(|r| r.classification == Classification::Cancelled)
            .count();
        if cancelled > 0 {
            warn!("Classification cancelled, {cancelled} documents not started");
        }

        results
    }

    /// Classify a single document.
    pub async fn classify_one(&self, identifier: &str, text: &str) -> Result<Prediction> {
        let vector = self.cache.get_or_compute(identifier, text).await?;
        Ok(self.classifier.predict(&vector))
    }

    /// Per-label share of the top-k neighbors of a document.
    pub async fn predict_probabilities(
        &self,
        identifier: &str,
        text: &str,
    ) -> Result<BTreeMap<String, f32>> {
        let vector = self.cache.get_or_compute(identifier, text).await?;
        Ok(self.classifier.predict_probabilities(&vector))
    }

    /// Embed documents with bounded parallelism, preserving input order.
    ///
    /// `None` marks a document skipped because of cancellation. Blank
    /// documents fail without reaching the cache.
    async fn embed_all<'a>(
        &self,
        documents: impl Iterator<Item = &'a Document>,
        cancel: &CancellationToken,
    ) -> Vec<Option<docsort_embeddings::Result<Embedding>>> {
        let cache = &self.cache;
        stream::iter(documents)
            .map(|document| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                if document.text.trim().is_empty() {
                    return Some(Err(EmbeddingError::EmptyText));
                }
                Some(cache.get_or_compute(&document.identifier, &document.text).await)
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn annotate(&self, identifier: &str, label: &str) {
        if !self.annotate_labels {
            return;
        }
        if let Err(e) = self.cache.annotate(identifier, label).await {
            warn!("Could not record label {label} for {identifier}: {e}");
        }
    }
}
