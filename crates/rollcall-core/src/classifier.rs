//! k-nearest-neighbor classifier over flattened face sample vectors.
//!
//! The "model" is the training set itself: a feature matrix plus one label
//! per row. Prediction is a Euclidean nearest-neighbor search with a
//! majority vote over the k closest rows. There is no rejection threshold;
//! the classifier always answers with some enrolled label.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("cannot fit a classifier on an empty training set")]
    EmptyTrainingSet,
    #[error("feature/label count mismatch: {features} rows, {labels} labels")]
    LabelMismatch { features: usize, labels: usize },
    #[error("feature vector has {got} dimensions, model expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Outcome of a nearest-neighbor prediction.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub label: String,
    /// Euclidean distance to the closest neighbor carrying the winning
    /// label. Logged for observability; never used as a cutoff.
    pub distance: f32,
}

/// A fitted k-NN model. Serialized as-is to form the persisted artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnClassifier {
    k: usize,
    features: Array2<f32>,
    labels: Vec<String>,
}

impl KnnClassifier {
    /// Fit a classifier over the full training set.
    ///
    /// `k` is clamped to the number of rows, so a freshly enrolled single
    /// identity with fewer than `k` samples is still usable.
    pub fn fit(k: usize, features: Array2<f32>, labels: Vec<String>) -> Result<Self, ClassifierError> {
        if features.nrows() == 0 {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        if features.nrows() != labels.len() {
            return Err(ClassifierError::LabelMismatch {
                features: features.nrows(),
                labels: labels.len(),
            });
        }
        Ok(Self {
            k: k.max(1),
            features,
            labels,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn sample_count(&self) -> usize {
        self.features.nrows()
    }

    pub fn feature_dim(&self) -> usize {
        self.features.ncols()
    }

    /// Predict the label of a flattened sample vector.
    pub fn predict(&self, vector: &[f32]) -> Result<Prediction, ClassifierError> {
        if vector.len() != self.features.ncols() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.features.ncols(),
                got: vector.len(),
            });
        }

        let mut distances: Vec<(f32, usize)> = self
            .features
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| (euclidean(row, vector), i))
            .collect();
        distances.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let k = self.k.min(distances.len());
        let neighbors = &distances[..k];

        // Majority vote; ties go to the label with the closest neighbor,
        // which is also the first seen since neighbors are distance-sorted.
        let mut votes: Vec<(&str, usize, f32)> = Vec::new();
        for &(dist, idx) in neighbors {
            let label = self.labels[idx].as_str();
            match votes.iter_mut().find(|(l, _, _)| *l == label) {
                Some(entry) => entry.1 += 1,
                None => votes.push((label, 1, dist)),
            }
        }
        let (label, _, distance) = votes
            .iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal)))
            .copied()
            .ok_or(ClassifierError::EmptyTrainingSet)?;

        Ok(Prediction {
            label: label.to_string(),
            distance,
        })
    }
}

fn euclidean(row: ArrayView1<'_, f32>, vector: &[f32]) -> f32 {
    row.iter()
        .zip(vector.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_cluster_model() -> KnnClassifier {
        // Cluster A around 0, cluster B around 100.
        let features = array![
            [0.0, 1.0],
            [1.0, 0.0],
            [2.0, 2.0],
            [100.0, 99.0],
            [99.0, 101.0],
            [101.0, 100.0],
        ];
        let labels = vec![
            "alice_101".to_string(),
            "alice_101".to_string(),
            "alice_101".to_string(),
            "bob_102".to_string(),
            "bob_102".to_string(),
            "bob_102".to_string(),
        ];
        KnnClassifier::fit(5, features, labels).unwrap()
    }

    #[test]
    fn test_fit_rejects_empty() {
        let features = Array2::<f32>::zeros((0, 4));
        assert!(matches!(
            KnnClassifier::fit(5, features, vec![]),
            Err(ClassifierError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn test_fit_rejects_label_mismatch() {
        let features = Array2::<f32>::zeros((3, 4));
        let labels = vec!["a".to_string()];
        assert!(matches!(
            KnnClassifier::fit(5, features, labels),
            Err(ClassifierError::LabelMismatch { .. })
        ));
    }

    #[test]
    fn test_predict_nearest_cluster() {
        let model = two_cluster_model();
        assert_eq!(model.predict(&[1.0, 1.0]).unwrap().label, "alice_101");
        assert_eq!(model.predict(&[98.0, 100.0]).unwrap().label, "bob_102");
    }

    #[test]
    fn test_predict_always_answers() {
        // A probe far from both clusters still gets the nearest label.
        let model = two_cluster_model();
        let pred = model.predict(&[40.0, 40.0]).unwrap();
        assert_eq!(pred.label, "alice_101");
        assert!(pred.distance > 0.0);
    }

    #[test]
    fn test_predict_dimension_mismatch() {
        let model = two_cluster_model();
        assert!(matches!(
            model.predict(&[1.0, 2.0, 3.0]),
            Err(ClassifierError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_k_clamped_to_sample_count() {
        let features = array![[0.0f32, 0.0], [10.0, 10.0]];
        let labels = vec!["a_1".to_string(), "b_2".to_string()];
        let model = KnnClassifier::fit(5, features, labels).unwrap();
        // k=5 with 2 samples must not panic and must pick the nearest.
        assert_eq!(model.predict(&[9.0, 9.0]).unwrap().label, "b_2");
    }

    #[test]
    fn test_majority_vote_beats_single_nearest() {
        // Nearest single neighbor is "odd", but 4 of 5 neighbors are "even".
        let features = array![
            [0.0f32],
            [2.0],
            [3.0],
            [4.0],
            [5.0],
        ];
        let labels = vec![
            "odd_1".to_string(),
            "even_2".to_string(),
            "even_2".to_string(),
            "even_2".to_string(),
            "even_2".to_string(),
        ];
        let model = KnnClassifier::fit(5, features, labels).unwrap();
        assert_eq!(model.predict(&[0.5]).unwrap().label, "even_2");
    }

    #[test]
    fn test_artifact_roundtrip() {
        let model = two_cluster_model();
        let json = serde_json::to_string(&model).unwrap();
        let restored: KnnClassifier = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.k(), model.k());
        assert_eq!(restored.sample_count(), model.sample_count());
        assert_eq!(restored.predict(&[1.0, 1.0]).unwrap().label, "alice_101");
    }
}
