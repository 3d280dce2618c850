//! Full-rebuild training of the classifier from the current face store
//! state. Runs after every enrollment and every identity deletion.

use crate::classifier::{ClassifierError, KnnClassifier};
use crate::face_store::{FaceStore, FaceStoreError};
use crate::model_store::{ModelStore, ModelStoreError};
use crate::types::FEATURE_DIM;
use ndarray::Array2;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    FaceStore(#[from] FaceStoreError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    ModelStore(#[from] ModelStoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainOutcome {
    Trained { identities: usize, samples: usize },
    /// The face store held no readable samples; any previously persisted
    /// artifact is left untouched.
    NoSamples,
}

/// Rebuild the model from every sample in the store and overwrite the
/// persisted artifact. Never incremental.
pub fn train(
    store: &FaceStore,
    model_store: &dyn ModelStore,
    k: usize,
) -> Result<TrainOutcome, TrainError> {
    let training_set = store.load_training_set()?;
    if training_set.is_empty() {
        tracing::warn!(root = %store.root().display(), "no training samples found, keeping existing model");
        return Ok(TrainOutcome::NoSamples);
    }

    let samples = training_set.len();
    let mut features = Array2::<f32>::zeros((samples, FEATURE_DIM));
    let mut labels = Vec::with_capacity(samples);
    for (row, (vector, label)) in training_set.into_iter().enumerate() {
        for (col, value) in vector.into_iter().enumerate() {
            features[[row, col]] = value;
        }
        labels.push(label);
    }

    let identities = labels.iter().collect::<HashSet<_>>().len();
    let model = KnnClassifier::fit(k, features, labels)?;
    model_store.save(&model)?;

    tracing::info!(identities, samples, k = model.k(), "model retrained");
    Ok(TrainOutcome::Trained {
        identities,
        samples,
    })
}
