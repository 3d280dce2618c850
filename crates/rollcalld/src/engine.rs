//! Engine thread: owns the detector, the face store, the model artifact and
//! the ledger, and serializes every camera or training operation.
//!
//! HTTP handlers never touch hardware directly. They send a request over an
//! mpsc channel and await a oneshot reply, so capture sessions, retraining
//! and ledger writes cannot interleave.

use rollcall_core::capture::CaptureError;
use rollcall_core::detector::DetectorError;
use rollcall_core::face_store::FaceStoreError;
use rollcall_core::recognizer::RecognizeError;
use rollcall_core::trainer::{self, TrainError, TrainOutcome};
use rollcall_core::{
    capture_samples, recognize_and_mark, FaceDetector, FaceStore, IdentityKey, JsonModelStore,
    Ledger, OnnxFaceDetector, Recognition,
};
use rollcall_hw::{Camera, CameraError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("recognize error: {0}")]
    Recognize(#[from] RecognizeError),
    #[error("training error: {0}")]
    Train(#[from] TrainError),
    #[error("face store error: {0}")]
    FaceStore(#[from] FaceStoreError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment operation: samples captured, then a full retrain.
#[derive(Debug)]
pub struct RegisterOutcome {
    pub identity: IdentityKey,
    pub saved: usize,
    pub training: TrainOutcome,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Register {
        identity: IdentityKey,
        max_samples: usize,
        reply: oneshot::Sender<Result<RegisterOutcome, EngineError>>,
    },
    Mark {
        reply: oneshot::Sender<Result<Recognition, EngineError>>,
    },
    RemoveIdentity {
        identity: IdentityKey,
        reply: oneshot::Sender<Result<TrainOutcome, EngineError>>,
    },
    Retrain {
        reply: oneshot::Sender<Result<TrainOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Capture face samples for a new identity and retrain the model.
    pub async fn register(
        &self,
        identity: IdentityKey,
        max_samples: usize,
    ) -> Result<RegisterOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register {
                identity,
                max_samples,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run one recognition pass and log attendance for the predicted identity.
    pub async fn mark(&self) -> Result<Recognition, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Mark { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Delete an identity's samples and retrain on whatever remains.
    pub async fn remove_identity(
        &self,
        identity: IdentityKey,
    ) -> Result<TrainOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::RemoveIdentity {
                identity,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Rebuild the model from the face store without changing it.
    pub async fn retrain(&self) -> Result<TrainOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Retrain { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

#[cfg(test)]
impl EngineHandle {
    /// A handle whose engine never answers. Requests fail with
    /// `ChannelClosed`, which is enough for exercising routes that do not
    /// reach the camera.
    pub(crate) fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

/// Runtime knobs the engine needs beyond its owned stores.
pub struct EngineSettings {
    pub camera_device: String,
    pub detector_model_path: String,
    pub knn_k: usize,
    pub enroll_frame_budget: usize,
    pub mark_frame_budget: usize,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads the detection model synchronously (fail-fast), then enters the
/// request loop. The camera is opened per session, not held open, so the
/// device stays free between operations and a missing camera fails only
/// the operation that needed it.
pub fn spawn_engine(
    settings: EngineSettings,
    face_store: FaceStore,
    model_store: JsonModelStore,
    ledger: Ledger,
) -> Result<EngineHandle, EngineError> {
    let mut detector = OnnxFaceDetector::load(&settings.detector_model_path)?;
    tracing::info!(path = %settings.detector_model_path, "face detector loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register {
                        identity,
                        max_samples,
                        reply,
                    } => {
                        let result = run_register(
                            &settings,
                            &mut detector,
                            &face_store,
                            &model_store,
                            &identity,
                            max_samples,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Mark { reply } => {
                        let result =
                            run_mark(&settings, &mut detector, &model_store, &ledger);
                        let _ = reply.send(result);
                    }
                    EngineRequest::RemoveIdentity { identity, reply } => {
                        let result =
                            run_remove(&settings, &face_store, &model_store, &identity);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Retrain { reply } => {
                        let result = trainer::train(&face_store, &model_store, settings.knn_k)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Capture samples for the identity, then retrain over the whole store.
fn run_register(
    settings: &EngineSettings,
    detector: &mut dyn FaceDetector,
    face_store: &FaceStore,
    model_store: &JsonModelStore,
    identity: &IdentityKey,
    max_samples: usize,
) -> Result<RegisterOutcome, EngineError> {
    let mut camera = Camera::open(&settings.camera_device)?;
    let report = capture_samples(
        &mut camera,
        detector,
        face_store,
        identity,
        max_samples,
        settings.enroll_frame_budget,
    )?;
    drop(camera);

    let training = trainer::train(face_store, model_store, settings.knn_k)?;
    tracing::info!(
        identity = %identity,
        saved = report.saved,
        ?training,
        "enrollment finished"
    );
    Ok(RegisterOutcome {
        identity: identity.clone(),
        saved: report.saved,
        training,
    })
}

fn run_mark(
    settings: &EngineSettings,
    detector: &mut dyn FaceDetector,
    model_store: &JsonModelStore,
    ledger: &Ledger,
) -> Result<Recognition, EngineError> {
    let mut camera = Camera::open(&settings.camera_device)?;
    let recognition = recognize_and_mark(
        &mut camera,
        detector,
        model_store,
        ledger,
        settings.mark_frame_budget,
    )?;
    Ok(recognition)
}

/// Drop the identity's folder and retrain. An empty store afterwards is a
/// no-op retrain that keeps the previous artifact.
fn run_remove(
    settings: &EngineSettings,
    face_store: &FaceStore,
    model_store: &JsonModelStore,
    identity: &IdentityKey,
) -> Result<TrainOutcome, EngineError> {
    face_store.remove_identity(identity)?;
    let training = trainer::train(face_store, model_store, settings.knn_k)?;
    tracing::info!(identity = %identity, ?training, "identity removed");
    Ok(training)
}
