use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Descriptor length produced by the browser-side face model.
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid embedding length: expected {expected}, got {actual}")]
    InvalidEmbeddingLength { expected: usize, actual: usize },
}

/// Face embedding vector (128-dimensional for the browser face model).
///
/// Values are fixed once the embedding is produced; there is no mutable
/// access to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fail with `InvalidEmbeddingLength` unless this embedding has `expected` values.
    pub fn check_len(&self, expected: usize) -> Result<(), MatchError> {
        if self.values.len() == expected {
            Ok(())
        } else {
            Err(MatchError::InvalidEmbeddingLength {
                expected,
                actual: self.values.len(),
            })
        }
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Both embeddings must have the same length; a mismatch is reported
    /// against `self`'s length rather than truncating to the shorter one.
    pub fn distance(&self, other: &Embedding) -> Result<f64, MatchError> {
        other.check_len(self.values.len())?;
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt())
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

/// Who a catalog entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

/// An enrolled face: identity, descriptor, and when it was enrolled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity: Identity,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = Embedding::new(vec![0.25, -1.5, 3.0, 0.0]);
        assert_eq!(a.distance(&a).unwrap(), 0.0);
    }

    #[test]
    fn test_distance_pythagorean() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert_eq!(a.distance(&b).unwrap(), 5.0);
        assert_eq!(b.distance(&a).unwrap(), 5.0);
    }

    #[test]
    fn test_distance_length_mismatch() {
        let a = Embedding::new(vec![0.0; 3]);
        let b = Embedding::new(vec![0.0; DEFAULT_EMBEDDING_DIM]);
        assert_eq!(
            a.distance(&b),
            Err(MatchError::InvalidEmbeddingLength {
                expected: 3,
                actual: DEFAULT_EMBEDDING_DIM
            })
        );
    }

    #[test]
    fn test_check_len() {
        let a = Embedding::new(vec![1.0, 2.0]);
        assert!(a.check_len(2).is_ok());
        assert!(a.check_len(128).is_err());
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let a = Embedding::new(vec![0.5, -0.25]);
        assert_eq!(serde_json::to_string(&a).unwrap(), "[0.5,-0.25]");
    }

    fn descriptor(len: std::ops::RangeInclusive<usize>) -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(-1.0e6f64..1.0e6, len)
    }

    proptest! {
        #[test]
        fn distance_to_self_is_zero(values in descriptor(0..=DEFAULT_EMBEDDING_DIM)) {
            let a = Embedding::new(values);
            prop_assert_eq!(a.distance(&a), Ok(0.0));
        }

        #[test]
        fn distance_is_symmetric(
            (xs, ys) in (1..=DEFAULT_EMBEDDING_DIM)
                .prop_flat_map(|n| (descriptor(n..=n), descriptor(n..=n)))
        ) {
            let (a, b) = (Embedding::new(xs), Embedding::new(ys));
            let d = a.distance(&b).unwrap();
            prop_assert!(d >= 0.0);
            prop_assert_eq!(b.distance(&a), Ok(d));
        }
    }
}
