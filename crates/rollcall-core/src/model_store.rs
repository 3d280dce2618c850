//! Persistence of the single global classifier artifact.

use crate::classifier::KnnClassifier;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelStoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Storage seam for the trained model: one artifact, overwritten on every
/// retrain, absent until the first successful training run.
pub trait ModelStore: Send {
    /// `Ok(None)` means "not trained yet", which callers must tolerate.
    fn load(&self) -> Result<Option<KnnClassifier>, ModelStoreError>;
    fn save(&self, model: &KnnClassifier) -> Result<(), ModelStoreError>;
}

/// JSON file implementation.
#[derive(Debug, Clone)]
pub struct JsonModelStore {
    path: PathBuf,
}

impl JsonModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelStore for JsonModelStore {
    fn load(&self) -> Result<Option<KnnClassifier>, ModelStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, model: &KnnClassifier) -> Result<(), ModelStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string(model)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn model() -> KnnClassifier {
        let features = array![[0.0f32, 0.0], [5.0, 5.0]];
        KnnClassifier::fit(1, features, vec!["a_1".into(), "b_2".into()]).unwrap()
    }

    #[test]
    fn test_load_absent_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = JsonModelStore::new(tmp.path().join("model.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let store = JsonModelStore::new(tmp.path().join("nested/model.json"));

        store.save(&model()).unwrap();
        let restored = store.load().unwrap().unwrap();
        assert_eq!(restored.sample_count(), 2);
        assert_eq!(restored.predict(&[4.0, 4.0]).unwrap().label, "b_2");
    }

    #[test]
    fn test_save_overwrites_in_place() {
        let tmp = TempDir::new().unwrap();
        let store = JsonModelStore::new(tmp.path().join("model.json"));

        store.save(&model()).unwrap();
        let bigger = KnnClassifier::fit(
            1,
            array![[0.0f32, 0.0], [1.0, 1.0], [9.0, 9.0]],
            vec!["a_1".into(), "a_1".into(), "c_3".into()],
        )
        .unwrap();
        store.save(&bigger).unwrap();

        assert_eq!(store.load().unwrap().unwrap().sample_count(), 3);
    }

    #[test]
    fn test_corrupt_artifact_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("model.json");
        std::fs::write(&path, "{ nope").unwrap();
        let store = JsonModelStore::new(path);
        assert!(matches!(store.load(), Err(ModelStoreError::Corrupt(_))));
    }
}
