use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Dimensionality of every stored face embedding (ArcFace-class models).
pub const EMBEDDING_DIM: usize = 512;

/// Tolerance when checking that a vector is already unit-normalized.
pub const NORM_EPSILON: f32 = 1e-3;

/// Face embedding vector (512-dimensional).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) norm of the vector.
    pub fn l2_norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Whether the vector is unit-normalized within [`NORM_EPSILON`].
    pub fn is_unit_norm(&self) -> bool {
        (self.l2_norm() - 1.0).abs() <= NORM_EPSILON
    }

    /// Return an L2-normalized copy.
    ///
    /// Fails with `InvalidVector` for a zero vector — there is no
    /// direction to preserve.
    pub fn normalized(&self) -> Result<Embedding> {
        let norm = self.l2_norm();
        if norm == 0.0 {
            return Err(Error::InvalidVector(
                "zero vector cannot be normalized".to_string(),
            ));
        }
        Ok(Embedding {
            values: self.values.iter().map(|v| v / norm).collect(),
            model_version: self.model_version.clone(),
        })
    }

    /// Validate dimensionality and return an L2-normalized copy ready for
    /// storage.
    ///
    /// Every store implementation routes `put` through this so the
    /// `‖vector‖₂ == 1` invariant holds for all stored records.
    pub fn into_stored(self) -> Result<Embedding> {
        if self.dim() != EMBEDDING_DIM {
            return Err(Error::InvalidVector(format!(
                "expected {EMBEDDING_DIM} dimensions, got {}",
                self.dim()
            )));
        }
        self.normalized()
    }

    /// Dot product with `other`.
    ///
    /// For two unit-normalized vectors this is cosine similarity in
    /// [-1, 1]. The engines guarantee both sides are unit-normalized
    /// before scoring — this is the single similarity metric in the
    /// system.
    pub fn dot(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

/// A stored embedding with its owner and write timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub person_id: String,
    pub embedding: Embedding,
    pub updated_at: DateTime<Utc>,
}

/// A registered identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub person_id: String,
    pub display_name: String,
    /// Unique contact handle (the original service used an email address).
    pub contact_key: String,
    /// Opaque handle to an externally stored profile image, if any.
    pub profile_ref: Option<String>,
    /// Trees this person belongs to. Every mutation path keeps the
    /// cardinality at most 1; kept as a set so future multi-tree linking
    /// needs no schema change.
    #[serde(default)]
    pub tree_memberships: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

/// One ranked result from the similarity search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub person_id: String,
    /// Dot product of unit-normalized vectors, in [-1, 1].
    pub score: f32,
}

/// A search hit enriched with the trees the matched identity created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedHit {
    pub person_id: String,
    pub score: f32,
    pub owned_tree_ids: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis(idx: usize) -> Embedding {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[idx] = 1.0;
        Embedding::new(values)
    }

    #[test]
    fn normalized_produces_unit_norm() {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[0] = 3.0;
        values[1] = 4.0;
        let e = Embedding::new(values).normalized().unwrap();
        assert!((e.l2_norm() - 1.0).abs() < 1e-6);
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalized_rejects_zero_vector() {
        let e = Embedding::new(vec![0.0f32; EMBEDDING_DIM]);
        assert!(matches!(e.normalized(), Err(Error::InvalidVector(_))));
    }

    #[test]
    fn into_stored_rejects_wrong_dimension() {
        let e = Embedding::new(vec![1.0, 0.0]);
        assert!(matches!(e.into_stored(), Err(Error::InvalidVector(_))));
    }

    #[test]
    fn into_stored_normalizes() {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[7] = 2.5;
        let stored = Embedding::new(values).into_stored().unwrap();
        assert!(stored.is_unit_norm());
    }

    #[test]
    fn dot_of_identical_unit_vectors_is_one() {
        let a = basis(3);
        assert!((a.dot(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dot_of_orthogonal_vectors_is_zero() {
        assert!(basis(0).dot(&basis(1)).abs() < 1e-6);
    }

    #[test]
    fn dot_of_opposite_vectors_is_minus_one() {
        let a = basis(0);
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[0] = -1.0;
        let b = Embedding::new(values);
        assert!((a.dot(&b) + 1.0).abs() < 1e-6);
    }
}
