// src/matching/similarity.rs
use anyhow::{anyhow, Result};
use log::warn;
use ndarray::{Array1, ArrayView1};

/// A vector widened to f64 with its norm computed once, so each pairwise
/// comparison costs a single dot product.
#[derive(Debug, Clone)]
pub struct PreparedVector {
    values: Array1<f64>,
    norm: f64,
}

impl PreparedVector {
    pub fn new(vector: &[f32]) -> Self {
        let values = ArrayView1::from(vector).mapv(f64::from);
        let norm = values.dot(&values).sqrt();
        Self { values, norm }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn norm(&self) -> f64 {
        self.norm
    }

    /// False for empty, zero-norm, or non-finite vectors.
    pub fn has_signal(&self) -> bool {
        !self.values.is_empty() && self.norm.is_finite() && self.norm > 0.0
    }

    /// Cosine similarity; 0.0 whenever either side has no signal.
    pub fn cosine(&self, other: &PreparedVector) -> Result<f64> {
        if self.len() != other.len() {
            return Err(anyhow!(
                "Input vector lengths differ: {} vs {}",
                self.len(),
                other.len()
            ));
        }
        if !self.has_signal() || !other.has_signal() {
            return Ok(0.0);
        }

        let dot = self.values.dot(&other.values);
        let similarity = dot / (self.norm * other.norm);

        if similarity.is_nan() || similarity.is_infinite() {
            warn!(
                "Calculated similarity is NaN or Infinite. dot_product: {}, mag1: {}, mag2: {}",
                dot, self.norm, other.norm
            );
            return Ok(0.0);
        }

        Ok(similarity)
    }
}

/// `dot(a, b) / (|a| * |b|)`, defined as 0.0 when either norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    PreparedVector::new(a).cosine(&PreparedVector::new(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_and_orthogonal() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert!((sim - 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_exact_values() {
        // 4 / (5 * 1) and 24 / (5 * 5) are computed exactly in f64.
        assert_eq!(cosine_similarity(&[4.0, 3.0], &[1.0, 0.0]).unwrap(), 0.8);
        assert_eq!(cosine_similarity(&[3.0, 4.0], &[4.0, 3.0]).unwrap(), 0.96);
    }

    #[test]
    fn test_zero_vector_is_exactly_zero() {
        let sim = cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(sim, 0.0);
        assert!(!sim.is_nan());
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_opposite_vectors() {
        let sim = cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]).unwrap();
        assert!((sim + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_prepared_vector_signal() {
        assert!(PreparedVector::new(&[0.5, 0.5]).has_signal());
        assert!(!PreparedVector::new(&[]).has_signal());
        assert!(!PreparedVector::new(&[0.0; 8]).has_signal());
        assert!(!PreparedVector::new(&[f32::NAN, 1.0]).has_signal());
        assert_eq!(PreparedVector::new(&[3.0, 4.0]).norm(), 5.0);
    }
}
