//! Face store: one folder per enrolled identity, holding fixed-size
//! grayscale JPEG samples named by ordinal.
//!
//! Layout: `<root>/<name>_<roll>/<ordinal>.jpg`

use crate::types::{flatten_sample, IdentityKey, SAMPLE_SIZE};
use image::{imageops, GrayImage};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceStoreError {
    #[error("no face data for identity {0}")]
    IdentityNotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Filesystem-backed store of enrolled face samples.
#[derive(Debug, Clone)]
pub struct FaceStore {
    root: PathBuf,
}

impl FaceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn identity_dir(&self, identity: &IdentityKey) -> PathBuf {
        self.root.join(identity.to_string())
    }

    /// Create the identity's folder (and the store root) if absent.
    pub fn ensure_identity(&self, identity: &IdentityKey) -> Result<PathBuf, FaceStoreError> {
        let dir = self.identity_dir(identity);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Write a sample as the next-numbered JPEG in the identity's folder.
    /// Returns the path written.
    pub fn save_sample(
        &self,
        identity: &IdentityKey,
        sample: &GrayImage,
    ) -> Result<PathBuf, FaceStoreError> {
        let dir = self.ensure_identity(identity)?;
        let ordinal = next_ordinal(&dir)?;
        let path = dir.join(format!("{ordinal}.jpg"));
        sample.save(&path)?;
        Ok(path)
    }

    /// All enrolled identities, sorted by key. Folders that do not parse as
    /// `name_roll` are skipped with a warning rather than failing the scan.
    pub fn list_identities(&self) -> Result<Vec<IdentityKey>, FaceStoreError> {
        let mut identities = Vec::new();
        if !self.root.exists() {
            return Ok(identities);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let folder = entry.file_name().to_string_lossy().into_owned();
            match IdentityKey::parse(&folder) {
                Ok(identity) => identities.push(identity),
                Err(err) => {
                    tracing::warn!(folder, error = %err, "skipping unparseable face folder");
                }
            }
        }
        identities.sort_by_key(|i| i.to_string());
        Ok(identities)
    }

    /// Number of stored JPEG samples for an identity (0 if not enrolled).
    pub fn sample_count(&self, identity: &IdentityKey) -> Result<usize, FaceStoreError> {
        let dir = self.identity_dir(identity);
        if !dir.exists() {
            return Ok(0);
        }
        Ok(jpg_entries(&dir)?.len())
    }

    /// Whether any enrolled identity already uses the given roll.
    pub fn roll_in_use(&self, roll: &str) -> Result<bool, FaceStoreError> {
        Ok(self
            .list_identities()?
            .iter()
            .any(|identity| identity.roll() == roll))
    }

    /// Paths of an identity's stored JPEG samples, in ordinal order.
    pub fn sample_paths(&self, identity: &IdentityKey) -> Result<Vec<PathBuf>, FaceStoreError> {
        let dir = self.identity_dir(identity);
        if !dir.exists() {
            return Err(FaceStoreError::IdentityNotFound(identity.to_string()));
        }
        jpg_entries(&dir)
    }

    /// Remove an identity's folder and all samples in it.
    pub fn remove_identity(&self, identity: &IdentityKey) -> Result<(), FaceStoreError> {
        let dir = self.identity_dir(identity);
        if !dir.exists() {
            return Err(FaceStoreError::IdentityNotFound(identity.to_string()));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    /// Load every readable sample as a (feature vector, label) pair for
    /// training. Unreadable images are skipped, not errors.
    pub fn load_training_set(&self) -> Result<Vec<(Vec<f32>, String)>, FaceStoreError> {
        let mut samples = Vec::new();
        for identity in self.list_identities()? {
            let label = identity.to_string();
            let dir = self.identity_dir(&identity);
            for path in jpg_entries(&dir)? {
                let img = match image::open(&path) {
                    Ok(img) => img.to_luma8(),
                    Err(err) => {
                        tracing::debug!(path = %path.display(), error = %err, "skipping unreadable sample");
                        continue;
                    }
                };
                let resized =
                    imageops::resize(&img, SAMPLE_SIZE, SAMPLE_SIZE, imageops::FilterType::Triangle);
                if let Some(vector) = flatten_sample(&resized) {
                    samples.push((vector, label.clone()));
                }
            }
        }
        Ok(samples)
    }
}

/// Next free ordinal: one past the highest numbered JPEG present.
fn next_ordinal(dir: &Path) -> Result<u32, FaceStoreError> {
    let mut max: Option<u32> = None;
    for path in jpg_entries(dir)? {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if let Ok(n) = stem.parse::<u32>() {
                max = Some(max.map_or(n, |m| m.max(n)));
            }
        }
    }
    Ok(max.map_or(0, |m| m + 1))
}

fn jpg_entries(dir: &Path) -> Result<Vec<PathBuf>, FaceStoreError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jpg") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FEATURE_DIM;
    use tempfile::TempDir;

    fn sample(shade: u8) -> GrayImage {
        GrayImage::from_pixel(SAMPLE_SIZE, SAMPLE_SIZE, image::Luma([shade]))
    }

    fn store() -> (TempDir, FaceStore) {
        let dir = TempDir::new().unwrap();
        let store = FaceStore::new(dir.path().join("faces"));
        (dir, store)
    }

    #[test]
    fn test_save_sample_numbers_sequentially() {
        let (_tmp, store) = store();
        let alice = IdentityKey::new("alice", "101").unwrap();

        let first = store.save_sample(&alice, &sample(10)).unwrap();
        let second = store.save_sample(&alice, &sample(20)).unwrap();

        assert!(first.ends_with("alice_101/0.jpg"));
        assert!(second.ends_with("alice_101/1.jpg"));
        assert_eq!(store.sample_count(&alice).unwrap(), 2);
    }

    #[test]
    fn test_ordinals_continue_after_gap() {
        let (_tmp, store) = store();
        let alice = IdentityKey::new("alice", "101").unwrap();
        let dir = store.ensure_identity(&alice).unwrap();
        sample(1).save(dir.join("7.jpg")).unwrap();

        let path = store.save_sample(&alice, &sample(2)).unwrap();
        assert!(path.ends_with("alice_101/8.jpg"));
    }

    #[test]
    fn test_list_identities_sorted_and_filtered() {
        let (_tmp, store) = store();
        store
            .ensure_identity(&IdentityKey::new("bob", "102").unwrap())
            .unwrap();
        store
            .ensure_identity(&IdentityKey::new("alice", "101").unwrap())
            .unwrap();
        // A folder that is not a name_roll key is ignored.
        fs::create_dir_all(store.root().join("junk")).unwrap();

        let identities = store.list_identities().unwrap();
        let keys: Vec<String> = identities.iter().map(|i| i.to_string()).collect();
        assert_eq!(keys, vec!["alice_101", "bob_102"]);
    }

    #[test]
    fn test_list_identities_missing_root() {
        let (_tmp, store) = store();
        assert!(store.list_identities().unwrap().is_empty());
    }

    #[test]
    fn test_roll_in_use() {
        let (_tmp, store) = store();
        store
            .ensure_identity(&IdentityKey::new("alice", "101").unwrap())
            .unwrap();
        assert!(store.roll_in_use("101").unwrap());
        assert!(!store.roll_in_use("999").unwrap());
    }

    #[test]
    fn test_remove_identity() {
        let (_tmp, store) = store();
        let alice = IdentityKey::new("alice", "101").unwrap();
        store.save_sample(&alice, &sample(5)).unwrap();

        store.remove_identity(&alice).unwrap();
        assert_eq!(store.sample_count(&alice).unwrap(), 0);

        assert!(matches!(
            store.remove_identity(&alice),
            Err(FaceStoreError::IdentityNotFound(_))
        ));
    }

    #[test]
    fn test_load_training_set_labels_and_dims() {
        let (_tmp, store) = store();
        let alice = IdentityKey::new("alice", "101").unwrap();
        let bob = IdentityKey::new("bob", "102").unwrap();
        store.save_sample(&alice, &sample(30)).unwrap();
        store.save_sample(&alice, &sample(40)).unwrap();
        store.save_sample(&bob, &sample(200)).unwrap();

        let set = store.load_training_set().unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.iter().all(|(v, _)| v.len() == FEATURE_DIM));
        assert_eq!(set.iter().filter(|(_, l)| l == "alice_101").count(), 2);
        assert_eq!(set.iter().filter(|(_, l)| l == "bob_102").count(), 1);
    }

    #[test]
    fn test_load_training_set_skips_unreadable() {
        let (_tmp, store) = store();
        let alice = IdentityKey::new("alice", "101").unwrap();
        let dir = store.ensure_identity(&alice).unwrap();
        fs::write(dir.join("0.jpg"), b"not a jpeg").unwrap();
        store.save_sample(&alice, &sample(60)).unwrap();

        let set = store.load_training_set().unwrap();
        assert_eq!(set.len(), 1);
    }
}
