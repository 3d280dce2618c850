//! Attendance recognition loop: load the persisted model, find a face,
//! predict its identity and log it to the ledger.

use crate::capture::{FrameSource, FrameSourceError};
use crate::classifier::{ClassifierError, KnnClassifier, Prediction};
use crate::detector::{DetectorError, FaceDetector};
use crate::ledger::{Ledger, LedgerError, MarkOutcome};
use crate::model_store::{ModelStore, ModelStoreError};
use crate::types::{flatten_sample, GrayFrame, IdentityKey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("no trained model available, enroll at least one face first")]
    ModelUnavailable,
    #[error("no face recognized within the frame budget")]
    NoFaceRecognized,
    #[error("model predicted unusable label {0:?}")]
    BadLabel(String),
    #[error(transparent)]
    Frame(#[from] FrameSourceError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    ModelStore(#[from] ModelStoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A recognized face and the ledger outcome for it.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub identity: IdentityKey,
    pub outcome: MarkOutcome,
    /// Nearest-neighbor distance of the winning prediction. Informational
    /// only: there is no rejection threshold, so an unenrolled face still
    /// resolves to the closest enrolled identity.
    pub distance: f32,
}

/// Predict the identity of the first detected face in a frame, if any.
pub fn predict_frame(
    model: &KnnClassifier,
    detector: &mut dyn FaceDetector,
    frame: &GrayFrame,
) -> Result<Option<Prediction>, RecognizeError> {
    let regions = detector.detect(frame)?;
    let Some(region) = regions.first() else {
        return Ok(None);
    };
    let Some(sample) = frame.crop_sample(region) else {
        return Ok(None);
    };
    // crop_sample only ever yields SAMPLE_SIZE squares, so flattening
    // cannot fail here; treat it as a skipped frame all the same.
    let Some(vector) = flatten_sample(&sample) else {
        return Ok(None);
    };
    Ok(Some(model.predict(&vector)?))
}

/// Run the marking loop: grab frames until one contains a recognizable
/// face, then log attendance for the predicted identity.
///
/// Both `Marked` and `AlreadyMarked` end the loop; so does exhausting
/// `frame_budget` (`NoFaceRecognized`). Loading no model at all is the
/// "not trained yet" condition.
pub fn recognize_and_mark(
    source: &mut dyn FrameSource,
    detector: &mut dyn FaceDetector,
    model_store: &dyn ModelStore,
    ledger: &Ledger,
    frame_budget: usize,
) -> Result<Recognition, RecognizeError> {
    let model = model_store
        .load()?
        .ok_or(RecognizeError::ModelUnavailable)?;

    for _ in 0..frame_budget {
        let frame = source.grab()?;
        let Some(prediction) = predict_frame(&model, detector, &frame)? else {
            continue;
        };

        let identity = IdentityKey::parse(&prediction.label)
            .map_err(|_| RecognizeError::BadLabel(prediction.label.clone()))?;
        let outcome = ledger.log(&identity)?;

        tracing::info!(
            identity = %identity,
            distance = prediction.distance,
            ?outcome,
            "face recognized"
        );
        return Ok(Recognition {
            identity,
            outcome,
            distance: prediction.distance,
        });
    }

    Err(RecognizeError::NoFaceRecognized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::test_support::{frame, ScriptedSource, WholeFrameDetector};
    use crate::face_store::FaceStore;
    use crate::model_store::JsonModelStore;
    use crate::trainer;
    use crate::types::SAMPLE_SIZE;
    use chrono::Local;
    use image::GrayImage;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        store: FaceStore,
        models: JsonModelStore,
        ledger: Ledger,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        Fixture {
            store: FaceStore::new(tmp.path().join("faces")),
            models: JsonModelStore::new(tmp.path().join("model.json")),
            ledger: Ledger::new(tmp.path().join("Attendance")),
            _tmp: tmp,
        }
    }

    fn enroll(fx: &Fixture, name: &str, roll: &str, shade: u8) {
        let identity = IdentityKey::new(name, roll).unwrap();
        for _ in 0..3 {
            let img = GrayImage::from_pixel(SAMPLE_SIZE, SAMPLE_SIZE, image::Luma([shade]));
            fx.store.save_sample(&identity, &img).unwrap();
        }
    }

    #[test]
    fn test_untrained_model_is_reported() {
        let fx = fixture();
        let mut source = ScriptedSource::new(vec![frame(100)]);
        let mut detector = WholeFrameDetector;

        let err =
            recognize_and_mark(&mut source, &mut detector, &fx.models, &fx.ledger, 1).unwrap_err();
        assert!(matches!(err, RecognizeError::ModelUnavailable));
    }

    #[test]
    fn test_recognize_marks_attendance() {
        let fx = fixture();
        enroll(&fx, "alice", "101", 60);
        enroll(&fx, "bob", "102", 200);
        trainer::train(&fx.store, &fx.models, 5).unwrap();

        let mut source = ScriptedSource::new(vec![frame(60)]);
        let mut detector = WholeFrameDetector;
        let recognition =
            recognize_and_mark(&mut source, &mut detector, &fx.models, &fx.ledger, 5).unwrap();

        assert_eq!(recognition.identity.to_string(), "alice_101");
        assert_eq!(recognition.outcome, MarkOutcome::Marked);

        let today = Local::now().date_naive();
        assert_eq!(fx.ledger.read_day(today).unwrap().len(), 1);
    }

    #[test]
    fn test_second_recognition_reports_already_marked() {
        let fx = fixture();
        enroll(&fx, "alice", "101", 60);
        trainer::train(&fx.store, &fx.models, 5).unwrap();
        let mut detector = WholeFrameDetector;

        for expected in [MarkOutcome::Marked, MarkOutcome::AlreadyMarked] {
            let mut source = ScriptedSource::new(vec![frame(60)]);
            let recognition =
                recognize_and_mark(&mut source, &mut detector, &fx.models, &fx.ledger, 5)
                    .unwrap();
            assert_eq!(recognition.outcome, expected);
        }

        let today = Local::now().date_naive();
        assert_eq!(fx.ledger.read_day(today).unwrap().len(), 1);
    }

    #[test]
    fn test_faceless_frames_exhaust_budget() {
        let fx = fixture();
        enroll(&fx, "alice", "101", 60);
        trainer::train(&fx.store, &fx.models, 5).unwrap();

        let mut source = ScriptedSource::new(vec![frame(0), frame(0), frame(0)]);
        let mut detector = WholeFrameDetector;
        let err =
            recognize_and_mark(&mut source, &mut detector, &fx.models, &fx.ledger, 3).unwrap_err();
        assert!(matches!(err, RecognizeError::NoFaceRecognized));
    }

    #[test]
    fn test_unseen_face_still_classifies() {
        // No rejection threshold: a shade far from both identities still
        // resolves to the nearest one.
        let fx = fixture();
        enroll(&fx, "alice", "101", 20);
        enroll(&fx, "bob", "102", 240);
        trainer::train(&fx.store, &fx.models, 5).unwrap();

        let mut source = ScriptedSource::new(vec![frame(90)]);
        let mut detector = WholeFrameDetector;
        let recognition =
            recognize_and_mark(&mut source, &mut detector, &fx.models, &fx.ledger, 5).unwrap();
        assert_eq!(recognition.identity.to_string(), "alice_101");
        assert!(recognition.distance > 0.0);
    }
}
