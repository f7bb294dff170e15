//! k-nearest-neighbor classification by cosine similarity.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docsort_embeddings::{Embedding, cosine_similarity};

/// Label reported when no training vector is comparable with the query.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Neighbor identifier reported alongside [`UNKNOWN_LABEL`].
pub const NO_NEIGHBOR: &str = "none";

/// A labeled training vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    /// Category name.
    pub label: String,

    /// Document identifier.
    pub identifier: String,

    /// The document's embedding.
    pub vector: Embedding,
}

impl TrainingExample {
    /// Create a new training example.
    pub fn new(label: impl Into<String>, identifier: impl Into<String>, vector: Embedding) -> Self {
        Self {
            label: label.into(),
            identifier: identifier.into(),
            vector,
        }
    }
}

/// A training example scored against a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Category of the training example.
    pub label: String,

    /// Identifier of the training example.
    pub identifier: String,

    /// Cosine similarity to the query.
    pub score: f32,
}

/// Outcome of a single prediction.
///
/// `label` is the majority label among the top-k neighbors, while `score`
/// and `top_neighbor` describe the single closest neighbor, which may belong
/// to a different label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted label.
    pub label: String,

    /// Similarity of the closest neighbor.
    pub score: f32,

    /// Identifier of the closest neighbor.
    pub top_neighbor: String,
}

impl Prediction {
    /// The result returned when there are no comparable training vectors.
    pub fn unknown() -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            score: 0.0,
            top_neighbor: NO_NEIGHBOR.to_string(),
        }
    }

    /// Whether this is the no-candidates result.
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL && self.top_neighbor == NO_NEIGHBOR
    }
}

/// Nearest-neighbor classifier over a fixed training set.
///
/// Starts unfit; `fit` replaces the whole training set. Querying an unfit
/// classifier behaves like querying an empty training set.
#[derive(Debug, Clone)]
pub struct KnnClassifier {
    /// Number of neighbors consulted.
    k: usize,

    /// Active training set, `None` until the first `fit`.
    training: Option<Vec<TrainingExample>>,
}

impl KnnClassifier {
    /// Create an unfit classifier consulting `k` neighbors.
    pub fn new(k: usize) -> Self {
        Self { k, training: None }
    }

    /// Number of neighbors consulted.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Replace the training set.
    pub fn fit(&mut self, training: Vec<TrainingExample>) {
        debug!("Fitting k-NN classifier with {} examples", training.len());
        self.training = Some(training);
    }

    /// Whether `fit` has been called.
    pub fn is_fit(&self) -> bool {
        self.training.is_some()
    }

    /// Number of training examples.
    pub fn len(&self) -> usize {
        self.training.as_ref().map_or(0, Vec::len)
    }

    /// Whether there are no training examples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct labels in the training set, sorted.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self
            .examples()
            .iter()
            .map(|example| example.label.as_str())
            .collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    fn examples(&self) -> &[TrainingExample] {
        self.training.as_deref().unwrap_or_default()
    }

    /// The up-to-k training examples most similar to `query`, best first.
    ///
    /// Training vectors whose dimension differs from the query are skipped.
    /// Equal scores keep training-set order.
    pub fn neighbors(&self, query: &[f32]) -> Vec<Neighbor> {
        let mut scored: Vec<(OrderedFloat<f32>, &TrainingExample)> = self
            .examples()
            .iter()
            .filter(|example| example.vector.len() == query.len())
            .map(|example| (OrderedFloat(cosine_similarity(&example.vector, query)), example))
            .collect();

        // Stable sort, descending by score
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored
            .into_iter()
            .take(self.k)
            .map(|(score, example)| Neighbor {
                label: example.label.clone(),
                identifier: example.identifier.clone(),
                score: score.0,
            })
            .collect()
    }

    /// Predict a label for `query`.
    ///
    /// The top-k neighbors are grouped by label; groups are ranked by member
    /// count, then by summed similarity. The reported score and neighbor are
    /// those of the closest single neighbor.
    pub fn predict(&self, query: &[f32]) -> Prediction {
        let neighbors = self.neighbors(query);

        let Some(top) = neighbors.first() else {
            debug!("No neighbors found for prediction");
            return Prediction::unknown();
        };

        for neighbor in &neighbors {
            debug!(
                " - {} | label: {} | similarity: {:.4}",
                neighbor.identifier, neighbor.label, neighbor.score
            );
        }

        // Groups in order of first appearance, so remaining ties go to the
        // label of the better-ranked neighbor.
        let mut groups: Vec<LabelGroup<'_>> = Vec::new();
        for neighbor in &neighbors {
            match groups.iter_mut().find(|g| g.label == neighbor.label) {
                Some(group) => {
                    group.count += 1;
                    group.total_score += f64::from(neighbor.score);
                }
                None => groups.push(LabelGroup {
                    label: &neighbor.label,
                    count: 1,
                    total_score: f64::from(neighbor.score),
                }),
            }
        }

        groups.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| OrderedFloat(b.total_score).cmp(&OrderedFloat(a.total_score)))
        });

        let label = groups
            .first()
            .map_or(UNKNOWN_LABEL, |group| group.label)
            .to_string();
        debug!("Predicted label: {label}");

        Prediction {
            label,
            score: top.score,
            top_neighbor: top.identifier.clone(),
        }
    }

    /// Share of the top-k neighbors per label.
    ///
    /// The denominator is the configured `k`, not the number of neighbors
    /// found, so the values sum to less than 1.0 when fewer than `k`
    /// training vectors are comparable with the query.
    pub fn predict_probabilities(&self, query: &[f32]) -> BTreeMap<String, f32> {
        let mut probabilities = BTreeMap::new();
        for neighbor in self.neighbors(query) {
            *probabilities.entry(neighbor.label).or_insert(0.0) += 1.0;
        }

        let k = self.k as f32;
        for value in probabilities.values_mut() {
            *value /= k;
        }
        probabilities
    }
}

struct LabelGroup<'a> {
    label: &'a str,
    count: usize,
    total_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn example(label: &str, identifier: &str, vector: &[f32]) -> TrainingExample {
        TrainingExample::new(label, identifier, vector.to_vec())
    }

    fn scenario_classifier() -> KnnClassifier {
        let mut knn = KnnClassifier::new(2);
        knn.fit(vec![
            example("A", "f1", &[1.0, 0.0]),
            example("A", "f2", &[0.9, 0.1]),
            example("B", "f3", &[0.0, 1.0]),
        ]);
        knn
    }

    #[test]
    fn test_majority_label_and_top_neighbor() {
        let knn = scenario_classifier();

        let neighbors = knn.neighbors(&[1.0, 0.0]);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].identifier, "f1");
        assert_eq!(neighbors[1].identifier, "f2");
        assert!((neighbors[1].score - 0.9939).abs() < 1e-3);

        assert_eq!(
            knn.predict(&[1.0, 0.0]),
            Prediction {
                label: "A".to_string(),
                score: 1.0,
                top_neighbor: "f1".to_string(),
            }
        );
    }

    #[test]
    fn test_predict_is_deterministic() {
        let knn = scenario_classifier();
        let query = [0.6, 0.4];
        let first = knn.predict(&query);
        for _ in 0..10 {
            assert_eq!(knn.predict(&query), first);
        }
    }

    #[test]
    fn test_unfit_and_empty_return_unknown() {
        let unfit = KnnClassifier::new(3);
        assert!(!unfit.is_fit());
        assert_eq!(unfit.predict(&[1.0, 0.0]), Prediction::unknown());

        let mut empty = KnnClassifier::new(3);
        empty.fit(Vec::new());
        assert!(empty.is_fit());
        let prediction = empty.predict(&[1.0, 0.0]);
        assert_eq!(prediction.label, "unknown");
        assert_eq!(prediction.score, 0.0);
        assert_eq!(prediction.top_neighbor, "none");
        assert!(prediction.is_unknown());
    }

    #[test]
    fn test_mismatched_dimensions_are_ignored() {
        let mut knn = KnnClassifier::new(3);
        knn.fit(vec![
            example("wide", "w1", &[1.0, 0.0, 0.0]),
            example("narrow", "n1", &[0.0, 1.0]),
            example("wide", "w2", &[1.0, 1.0, 0.0]),
        ]);

        let neighbors = knn.neighbors(&[0.0, 1.0]);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].identifier, "n1");
        assert_eq!(knn.predict(&[0.0, 1.0]).label, "narrow");

        // Nothing has four dimensions.
        assert!(knn.predict(&[1.0, 0.0, 0.0, 0.0]).is_unknown());
    }

    #[test]
    fn test_count_beats_score() {
        // One very close "B" neighbor loses to two moderately close "A"s.
        let mut knn = KnnClassifier::new(3);
        knn.fit(vec![
            example("B", "b1", &[1.0, 0.0]),
            example("A", "a1", &[0.7, 0.7]),
            example("A", "a2", &[0.6, 0.8]),
            example("B", "b2", &[-1.0, 0.0]),
        ]);

        let prediction = knn.predict(&[1.0, 0.1]);
        assert_eq!(prediction.label, "A");
        assert_eq!(prediction.top_neighbor, "b1");
    }

    #[test]
    fn test_equal_counts_break_on_total_score() {
        let mut knn = KnnClassifier::new(4);
        knn.fit(vec![
            example("A", "a1", &[1.0, 0.0]),
            example("B", "b1", &[0.9, 0.2]),
            example("B", "b2", &[0.85, 0.25]),
            example("A", "a2", &[0.0, 1.0]),
        ]);

        // A: 1.0 + 0.0, B: ~0.98 + ~0.96
        let prediction = knn.predict(&[1.0, 0.0]);
        assert_eq!(prediction.label, "B");
        assert_eq!(prediction.top_neighbor, "a1");
        assert_eq!(prediction.score, 1.0);
    }

    #[test]
    fn test_fewer_candidates_than_k() {
        let mut knn = KnnClassifier::new(5);
        knn.fit(vec![example("A", "a1", &[1.0, 0.0]), example("B", "b1", &[0.0, 1.0])]);
        assert_eq!(knn.neighbors(&[1.0, 1.0]).len(), 2);
    }

    #[test]
    fn test_refit_replaces_training_set() {
        let mut knn = scenario_classifier();
        knn.fit(vec![example("C", "c1", &[1.0, 0.0])]);
        assert_eq!(knn.len(), 1);
        assert_eq!(knn.labels(), vec!["C"]);
        assert_eq!(knn.predict(&[1.0, 0.0]).label, "C");
    }

    #[test]
    fn test_probabilities_divide_by_k() {
        let mut knn = KnnClassifier::new(4);
        knn.fit(vec![
            example("A", "a1", &[1.0, 0.0]),
            example("A", "a2", &[0.9, 0.1]),
            example("B", "b1", &[0.0, 1.0]),
        ]);

        let probabilities = knn.predict_probabilities(&[1.0, 0.0]);
        assert_eq!(probabilities.len(), 2);
        assert_eq!(probabilities["A"], 0.5);
        assert_eq!(probabilities["B"], 0.25);

        assert!(KnnClassifier::new(3).predict_probabilities(&[1.0]).is_empty());
    }
}
