use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Edge length of a stored face sample in pixels. Samples are square.
pub const SAMPLE_SIZE: u32 = 50;
/// Dimensionality of a flattened face sample vector.
pub const FEATURE_DIM: usize = (SAMPLE_SIZE * SAMPLE_SIZE) as usize;
/// Default neighbor count for the classifier.
pub const DEFAULT_K: usize = 5;
/// Default number of samples captured per enrollment session.
pub const DEFAULT_MAX_SAMPLES: usize = 50;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("identity key must be <name>_<roll>, got {0:?}")]
    Malformed(String),
    #[error("name must not contain '_': {0:?}")]
    NameHasUnderscore(String),
    #[error("name and roll must not contain ',' or path separators: {0:?}")]
    ReservedCharacter(String),
    #[error("name and roll must both be non-empty")]
    Empty,
}

/// An enrolled person, keyed by `name_roll`.
///
/// The key doubles as the face store folder name and the `Name` column of
/// the ledger. The roll is always the second `_`-separated token, which is
/// why names with underscores are rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityKey {
    name: String,
    roll: String,
}

impl IdentityKey {
    pub fn new(name: &str, roll: &str) -> Result<Self, IdentityError> {
        let name = name.trim();
        let roll = roll.trim();
        if name.is_empty() || roll.is_empty() {
            return Err(IdentityError::Empty);
        }
        if name.contains('_') {
            return Err(IdentityError::NameHasUnderscore(name.to_string()));
        }
        // The key is both a ledger CSV field and a folder name.
        for field in [name, roll] {
            if field.contains([',', '/', '\\']) {
                return Err(IdentityError::ReservedCharacter(field.to_string()));
            }
        }
        Ok(Self {
            name: name.to_string(),
            roll: roll.to_string(),
        })
    }

    /// Parse a `name_roll` key, e.g. a face store folder name.
    pub fn parse(key: &str) -> Result<Self, IdentityError> {
        let (name, roll) = key
            .split_once('_')
            .ok_or_else(|| IdentityError::Malformed(key.to_string()))?;
        // A key like "alice_101_x" has a second token of "101": keep only
        // the part up to the next underscore, matching the roll derivation
        // rule used by the ledger.
        let roll = roll.split('_').next().unwrap_or(roll);
        Self::new(name, roll)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roll(&self) -> &str {
        &self.roll
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.name, self.roll)
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = IdentityError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> String {
        key.to_string()
    }
}

/// Bounding box for a detected face region, in frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// A grayscale frame handed to the detector, one byte per pixel.
#[derive(Debug, Clone)]
pub struct GrayFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl GrayFrame {
    /// Crop a detected region out of the frame and resize it to the fixed
    /// sample size. Returns `None` if the region lies entirely outside the
    /// frame or the frame buffer is inconsistent.
    pub fn crop_sample(&self, region: &FaceRegion) -> Option<GrayImage> {
        let img = GrayImage::from_raw(self.width, self.height, self.data.clone())?;

        let x0 = region.x.max(0.0) as u32;
        let y0 = region.y.max(0.0) as u32;
        if x0 >= self.width || y0 >= self.height {
            return None;
        }
        let w = ((region.x + region.width).min(self.width as f32) as u32).saturating_sub(x0);
        let h = ((region.y + region.height).min(self.height as f32) as u32).saturating_sub(y0);
        if w == 0 || h == 0 {
            return None;
        }

        let crop = imageops::crop_imm(&img, x0, y0, w, h).to_image();
        Some(imageops::resize(
            &crop,
            SAMPLE_SIZE,
            SAMPLE_SIZE,
            imageops::FilterType::Triangle,
        ))
    }
}

/// Flatten a fixed-size sample into the classifier's feature vector.
///
/// Returns `None` when the image is not exactly `SAMPLE_SIZE` square.
pub fn flatten_sample(sample: &GrayImage) -> Option<Vec<f32>> {
    if sample.width() != SAMPLE_SIZE || sample.height() != SAMPLE_SIZE {
        return None;
    }
    Some(sample.as_raw().iter().map(|&p| p as f32).collect())
}
