//! Enrollment capture loop: pull frames, detect faces, store samples.

use crate::detector::{DetectorError, FaceDetector};
use crate::face_store::{FaceStore, FaceStoreError};
use crate::types::{GrayFrame, IdentityKey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameSourceError {
    #[error("camera unavailable: {0}")]
    Device(String),
    #[error("capture failed: {0}")]
    Capture(String),
}

/// Seam over the camera (or a simulated frame feed in tests).
pub trait FrameSource {
    fn grab(&mut self) -> Result<GrayFrame, FrameSourceError>;
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Frame(#[from] FrameSourceError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Store(#[from] FaceStoreError),
}

/// What a capture session accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    /// Samples written to the face store.
    pub saved: usize,
    /// Frames pulled from the source, including faceless ones.
    pub frames_seen: usize,
}

/// Populate an identity's folder with face samples.
///
/// Every detected region in a frame is cropped, resized and saved; frames
/// with no detections are skipped silently. The loop ends when `max_samples`
/// have been saved or `frame_budget` frames have been consumed (the headless
/// stand-in for operator cancellation).
pub fn capture_samples(
    source: &mut dyn FrameSource,
    detector: &mut dyn FaceDetector,
    store: &FaceStore,
    identity: &IdentityKey,
    max_samples: usize,
    frame_budget: usize,
) -> Result<CaptureReport, CaptureError> {
    store.ensure_identity(identity)?;

    let mut saved = 0usize;
    let mut frames_seen = 0usize;

    while saved < max_samples && frames_seen < frame_budget {
        let frame = source.grab()?;
        frames_seen += 1;

        let regions = detector.detect(&frame)?;
        if regions.is_empty() {
            continue;
        }

        for region in &regions {
            let Some(sample) = frame.crop_sample(region) else {
                continue;
            };
            store.save_sample(identity, &sample)?;
            saved += 1;
            if saved >= max_samples {
                break;
            }
        }
    }

    tracing::info!(
        identity = %identity,
        saved,
        frames_seen,
        "capture session finished"
    );
    Ok(CaptureReport { saved, frames_seen })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, FaceStore, IdentityKey) {
        let tmp = TempDir::new().unwrap();
        let store = FaceStore::new(tmp.path().join("faces"));
        let identity = IdentityKey::new("alice", "101").unwrap();
        (tmp, store, identity)
    }

    #[test]
    fn test_capture_saves_up_to_max() {
        let (_tmp, store, identity) = fixture();
        let mut source = ScriptedSource::new((0..10).map(|i| frame(100 + i)).collect());
        let mut detector = WholeFrameDetector;

        let report =
            capture_samples(&mut source, &mut detector, &store, &identity, 5, 100).unwrap();
        assert_eq!(report.saved, 5);
        assert_eq!(report.frames_seen, 5);
        assert_eq!(store.sample_count(&identity).unwrap(), 5);
    }

    #[test]
    fn test_capture_skips_faceless_frames() {
        let (_tmp, store, identity) = fixture();
        // Black frames yield no detections and must not abort the session.
        let frames = vec![frame(0), frame(0), frame(120), frame(0), frame(130)];
        let mut source = ScriptedSource::new(frames);
        let mut detector = WholeFrameDetector;

        let report =
            capture_samples(&mut source, &mut detector, &store, &identity, 10, 5).unwrap();
        assert_eq!(report.saved, 2);
        assert_eq!(report.frames_seen, 5);
    }

    #[test]
    fn test_capture_stops_at_frame_budget() {
        let (_tmp, store, identity) = fixture();
        let mut source = ScriptedSource::new((0..3).map(|_| frame(0)).collect());
        let mut detector = WholeFrameDetector;

        let report =
            capture_samples(&mut source, &mut detector, &store, &identity, 10, 3).unwrap();
        assert_eq!(report.saved, 0);
        assert_eq!(store.sample_count(&identity).unwrap(), 0);
    }

    #[test]
    fn test_capture_device_error_propagates() {
        let (_tmp, store, identity) = fixture();

        struct DeadCamera;
        impl FrameSource for DeadCamera {
            fn grab(&mut self) -> Result<GrayFrame, FrameSourceError> {
                Err(FrameSourceError::Device("/dev/video0 missing".into()))
            }
        }

        let mut detector = WholeFrameDetector;
        let err = capture_samples(&mut DeadCamera, &mut detector, &store, &identity, 5, 5)
            .unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Frame(FrameSourceError::Device(_))
        ));
    }
}
