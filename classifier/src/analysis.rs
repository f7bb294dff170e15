//! Similarity reports over stored embedding records.
//!
//! Reads the same `*.json` records the embedding cache writes and compares
//! them either all-against-all or as a training × query matrix.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use docsort_embeddings::{Embedding, EmbeddingRecord, cosine_similarity};

use crate::error::{ClassifierError, Result};

/// Similarity of one unordered pair of documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseSimilarity {
    pub first: String,
    pub second: String,
    pub score: f32,
}

/// Row × column similarity table.
///
/// `scores[r][c]` compares `rows[r]` with `columns[c]`; it is `None` when the
/// two vectors have different dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    pub scores: Vec<Vec<Option<f32>>>,
}

impl SimilarityMatrix {
    /// Score for a row/column identifier pair.
    pub fn get(&self, row: &str, column: &str) -> Option<f32> {
        let r = self.rows.iter().position(|id| id == row)?;
        let c = self.columns.iter().position(|id| id == column)?;
        self.scores.get(r)?.get(c).copied().flatten()
    }
}

/// A set of stored embeddings keyed by document identifier.
///
/// Identifiers are kept sorted so every report is deterministic.
#[derive(Debug, Clone, Default)]
pub struct SimilarityAnalyzer {
    embeddings: BTreeMap<String, Embedding>,
}

impl SimilarityAnalyzer {
    /// Build an analyzer from in-memory embeddings.
    pub fn from_embeddings(embeddings: impl IntoIterator<Item = (String, Embedding)>) -> Self {
        Self {
            embeddings: embeddings.into_iter().collect(),
        }
    }

    /// Load every `*.json` record in `dir`.
    ///
    /// Records without a vector are skipped. A record's `identifier` field
    /// names it; the file stem is used when the field is absent.
    pub async fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut embeddings = BTreeMap::new();
        let mut skipped = 0usize;

        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!("Skipping record with non UTF-8 name: {}", path.display());
                continue;
            };

            let content = fs::read_to_string(&path).await?;
            let record: EmbeddingRecord =
                serde_json::from_str(&content).map_err(|e| ClassifierError::InvalidRecord {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

            let identifier = record.identifier_or(stem).to_string();
            let Some(vector) = record.vector else {
                debug!("Skipping {identifier}: no vector");
                skipped += 1;
                continue;
            };

            if embeddings.insert(identifier.clone(), vector).is_some() {
                warn!("Duplicate identifier {identifier} in {}", dir.display());
            }
        }

        info!(
            "Loaded {} embeddings from {} ({skipped} without vector)",
            embeddings.len(),
            dir.display()
        );

        Ok(Self { embeddings })
    }

    /// Number of loaded embeddings.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Whether nothing was loaded.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Sorted identifiers.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.embeddings.keys().map(String::as_str)
    }

    /// Similarity of every unordered pair of distinct identifiers.
    ///
    /// Pairs come out in ascending index order over the sorted identifiers.
    /// Pairs whose vectors differ in dimension are left out.
    pub fn pairs(&self) -> Vec<PairwiseSimilarity> {
        let entries: Vec<(&String, &Embedding)> = self.embeddings.iter().collect();
        let mut pairs = Vec::with_capacity(entries.len() * entries.len().saturating_sub(1) / 2);

        for (i, (first, a)) in entries.iter().enumerate() {
            for (second, b) in &entries[i + 1..] {
                if a.len() != b.len() {
                    warn!(
                        "Skipping {first} / {second}: dimension {} vs {}",
                        a.len(),
                        b.len()
                    );
                    continue;
                }
                pairs.push(PairwiseSimilarity {
                    first: (*first).clone(),
                    second: (*second).clone(),
                    score: cosine_similarity(a, b),
                });
            }
        }

        pairs
    }

    /// Compare every embedding here (rows) with every embedding in `queries`
    /// (columns).
    pub fn matrix(&self, queries: &SimilarityAnalyzer) -> SimilarityMatrix {
        let rows: Vec<String> = self.embeddings.keys().cloned().collect();
        let columns: Vec<String> = queries.embeddings.keys().cloned().collect();

        let scores = self
            .embeddings
            .values()
            .map(|a| {
                queries
                    .embeddings
                    .values()
                    .map(|b| (a.len() == b.len()).then(|| cosine_similarity(a, b)))
                    .collect()
            })
            .collect();

        SimilarityMatrix {
            rows,
            columns,
            scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_orthogonal_pairs_score_zero() {
        let analyzer = SimilarityAnalyzer::from_embeddings([
            ("x".to_string(), vec![1.0, 0.0, 0.0]),
            ("y".to_string(), vec![0.0, 1.0, 0.0]),
            ("z".to_string(), vec![0.0, 0.0, 1.0]),
        ]);

        let pairs = analyzer.pairs();
        let ids: Vec<(&str, &str)> = pairs
            .iter()
            .map(|p| (p.first.as_str(), p.second.as_str()))
            .collect();
        assert_eq!(ids, vec![("x", "y"), ("x", "z"), ("y", "z")]);
        assert!(pairs.iter().all(|p| p.score == 0.0));
    }

    #[test]
    fn test_pairs_skip_mismatched_dimensions() {
        let analyzer = SimilarityAnalyzer::from_embeddings([
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![1.0, 0.0]),
            ("c".to_string(), vec![1.0, 0.0, 0.0]),
        ]);

        let pairs = analyzer.pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].first, "a");
        assert_eq!(pairs[0].second, "b");
        assert!((pairs[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matrix_sorted_axes() {
        let training = SimilarityAnalyzer::from_embeddings([
            ("t2".to_string(), vec![0.0, 1.0]),
            ("t1".to_string(), vec![1.0, 0.0]),
        ]);
        let queries = SimilarityAnalyzer::from_embeddings([
            ("q2".to_string(), vec![1.0, 1.0]),
            ("q1".to_string(), vec![1.0, 0.0]),
            ("q3".to_string(), vec![1.0, 0.0, 0.0]),
        ]);

        let matrix = training.matrix(&queries);
        assert_eq!(matrix.rows, vec!["t1", "t2"]);
        assert_eq!(matrix.columns, vec!["q1", "q2", "q3"]);
        assert_eq!(matrix.get("t1", "q1"), Some(1.0));
        assert_eq!(matrix.get("t2", "q1"), Some(0.0));
        assert!((matrix.get("t2", "q2").unwrap() - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(matrix.get("t1", "q3"), None);
    }

    #[test]
    fn test_matrix_get_tolerates_short_score_rows() {
        let matrix = SimilarityMatrix {
            rows: vec!["t1".to_string(), "t2".to_string()],
            columns: vec!["q1".to_string(), "q2".to_string()],
            scores: vec![vec![Some(0.5)]],
        };

        assert_eq!(matrix.get("t1", "q1"), Some(0.5));
        assert_eq!(matrix.get("t1", "q2"), None);
        assert_eq!(matrix.get("t2", "q1"), None);
        assert_eq!(matrix.get("missing", "q1"), None);
    }

    #[tokio::test]
    async fn test_from_dir_skips_null_vectors() {
        let temp_dir = TempDir::new().unwrap();
        write(
            temp_dir.path(),
            "a.pdf.json",
            r#"{"identifier": "a.pdf", "vector": [1.0, 0.0]}"#,
        );
        write(temp_dir.path(), "b_stem.json", r#"{"vector": [0.0, 1.0]}"#);
        write(temp_dir.path(), "c.json", r#"{"identifier": "c", "vector": null}"#);
        write(temp_dir.path(), "notes.txt", "not a record");

        let analyzer = SimilarityAnalyzer::from_dir(temp_dir.path()).await.unwrap();
        assert_eq!(analyzer.identifiers().collect::<Vec<_>>(), vec!["a.pdf", "b_stem"]);
    }

    #[tokio::test]
    async fn test_from_dir_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "broken.json", "[1, 2");

        let err = SimilarityAnalyzer::from_dir(temp_dir.path()).await.unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidRecord { .. }));
    }
}
