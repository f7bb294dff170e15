//! Vector math over embeddings.

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Compute the cosine similarity between two embeddings.
///
/// Both slices must have the same length; filtering mismatched vectors out
/// is the caller's job. Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
///
/// If either vector has zero magnitude the result is exactly 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "cosine_similarity on mismatched lengths");

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Compute the elementwise mean of several embeddings.
///
/// Used to fold the per-chunk embeddings of a long document into one vector.
pub fn average(embeddings: &[Embedding]) -> Result<Embedding> {
    let Some(first) = embeddings.first() else {
        return Err(EmbeddingError::InvalidResponse(
            "no embeddings to average".to_string(),
        ));
    };

    let dim = first.len();
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
        return Err(EmbeddingError::InvalidResponse(format!(
            "chunk embeddings disagree on dimension: {dim} vs {}",
            bad.len()
        )));
    }

    let n = embeddings.len() as f32;
    let mut result = vec![0.0f32; dim];

    for embedding in embeddings {
        for (acc, val) in result.iter_mut().zip(embedding) {
            *acc += val;
        }
    }
    for acc in &mut result {
        *acc /= n;
    }

    Ok(result)
}
