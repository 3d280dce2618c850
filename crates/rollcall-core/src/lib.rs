//! Face-recognition attendance engine.
//!
//! Detection runs via ONNX Runtime; classification is a k-nearest-neighbor
//! model over flattened fixed-size grayscale samples. Enrolled samples live
//! in a per-identity folder tree, attendance in per-day CSV ledgers.

pub mod capture;
pub mod classifier;
pub mod detector;
pub mod face_store;
pub mod ledger;
pub mod model_store;
pub mod recognizer;
pub mod trainer;
pub mod types;

pub use capture::{capture_samples, CaptureReport, FrameSource, FrameSourceError};
pub use classifier::{KnnClassifier, Prediction};
pub use detector::{FaceDetector, OnnxFaceDetector};
pub use face_store::FaceStore;
pub use ledger::{AttendanceRecord, Ledger, MarkOutcome};
pub use model_store::{JsonModelStore, ModelStore};
pub use recognizer::{recognize_and_mark, Recognition};
pub use trainer::{train, TrainOutcome};
pub use types::{FaceRegion, GrayFrame, IdentityKey, DEFAULT_K, DEFAULT_MAX_SAMPLES, SAMPLE_SIZE};
