// src/models/matching.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::activity::{ActivityField, ActivityId};

/// Dense embedding of one field of one activity.
pub type Vector = Vec<f32>;

/// Vectors for the compared fields of one activity. `None` marks a field with
/// no usable signal (empty text, or the provider gave up on it).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityVectors {
    pub activity_id: ActivityId,
    pub vectors: BTreeMap<ActivityField, Option<Vector>>,
}

impl ActivityVectors {
    pub fn new(activity_id: ActivityId) -> Self {
        Self {
            activity_id,
            vectors: BTreeMap::new(),
        }
    }

    pub fn with_vector(mut self, field: ActivityField, vector: Option<Vector>) -> Self {
        self.vectors.insert(field, vector);
        self
    }

    pub fn get(&self, field: ActivityField) -> Option<&Vector> {
        self.vectors.get(&field).and_then(|v| v.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldSimilarity {
    pub field: ActivityField,
    /// Unrounded cosine similarity; rounding only happens when rendering.
    pub similarity: f64,
}

/// Two activities proposed for duplicate review. `id1 < id2` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub id1: ActivityId,
    pub id2: ActivityId,
    pub scores: Vec<FieldSimilarity>,
}

impl CandidatePair {
    /// Builds a pair in canonical order. Returns `None` for a self-pair.
    pub fn new(a: ActivityId, b: ActivityId, scores: Vec<FieldSimilarity>) -> Option<Self> {
        if a == b {
            return None;
        }
        let (id1, id2) = if a < b { (a, b) } else { (b, a) };
        Some(Self { id1, id2, scores })
    }

    pub fn similarity(&self, field: ActivityField) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.field == field)
            .map(|s| s.similarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_pair_is_canonical() {
        let pair = CandidatePair::new(9, 4, Vec::new()).unwrap();
        assert_eq!((pair.id1, pair.id2), (4, 9));
        assert!(CandidatePair::new(5, 5, Vec::new()).is_none());
    }

    #[test]
    fn test_similarity_lookup_by_field() {
        let pair = CandidatePair::new(
            1,
            2,
            vec![FieldSimilarity {
                field: ActivityField::Title,
                similarity: 0.91,
            }],
        )
        .unwrap();
        assert_eq!(pair.similarity(ActivityField::Title), Some(0.91));
        assert_eq!(pair.similarity(ActivityField::Supplies), None);
    }
}
