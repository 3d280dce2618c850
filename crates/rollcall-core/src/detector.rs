//! SCRFD-style face region detector via ONNX Runtime.
//!
//! Anchor-free decoding over three stride levels with NMS post-processing.
//! Only bounding boxes are decoded; the attendance pipeline crops and
//! resizes regions instead of aligning on landmarks.

use crate::types::{FaceRegion, GrayFrame};
use image::{imageops, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_SIZE: usize = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_THRESHOLD: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer inconsistent: {0}x{1} with {2} bytes")]
    BadFrame(u32, u32, usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Seam for the face-region detector so capture and recognition loops can
/// run against a stub in tests and against ONNX inference in production.
pub trait FaceDetector {
    /// Detect faces in a grayscale frame, sorted by descending confidence.
    /// An empty result is not an error; frames without faces are skipped
    /// by the callers.
    fn detect(&mut self, frame: &GrayFrame) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Scale/offset bookkeeping for mapping letterboxed coordinates back to
/// the original frame.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// ONNX-backed detector.
pub struct OnnxFaceDetector {
    session: Session,
}

impl OnnxFaceDetector {
    /// Load the detection model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        if num_outputs < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "detector model needs at least 6 outputs (3 strides x score/bbox), got {num_outputs}"
            )));
        }

        tracing::info!(
            path = model_path,
            outputs = num_outputs,
            "loaded face detection model"
        );

        Ok(Self { session })
    }

    /// Resize with letterbox padding into a NCHW float tensor, grayscale
    /// replicated across the three input channels.
    fn preprocess(frame: &GrayFrame) -> Result<(Array4<f32>, Letterbox), DetectorError> {
        let img = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or(DetectorError::BadFrame(frame.width, frame.height, frame.data.len()))?;

        let scale = (DET_INPUT_SIZE as f32 / frame.width as f32)
            .min(DET_INPUT_SIZE as f32 / frame.height as f32);
        let new_w = (frame.width as f32 * scale).round().max(1.0) as u32;
        let new_h = (frame.height as f32 * scale).round().max(1.0) as u32;
        let pad_x = (DET_INPUT_SIZE as u32 - new_w) / 2;
        let pad_y = (DET_INPUT_SIZE as u32 - new_h) / 2;

        let resized = imageops::resize(&img, new_w, new_h, imageops::FilterType::Triangle);

        // Padding pixels hold DET_MEAN so they normalize to zero.
        let mut tensor =
            Array4::<f32>::from_elem((1, 3, DET_INPUT_SIZE, DET_INPUT_SIZE), 0.0);
        for y in 0..DET_INPUT_SIZE {
            for x in 0..DET_INPUT_SIZE {
                let inside = (x as u32) >= pad_x
                    && (x as u32) < pad_x + new_w
                    && (y as u32) >= pad_y
                    && (y as u32) < pad_y + new_h;
                let pixel = if inside {
                    resized.get_pixel(x as u32 - pad_x, y as u32 - pad_y).0[0] as f32
                } else {
                    DET_MEAN
                };
                let normalized = (pixel - DET_MEAN) / DET_STD;
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        Ok((
            tensor,
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&mut self, frame: &GrayFrame) -> Result<Vec<FaceRegion>, DetectorError> {
        let (input, letterbox) = Self::preprocess(frame)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Standard SCRFD export ordering: [0-2] scores per stride,
        // [3-5] bbox offsets per stride (landmark tensors, if present,
        // follow and are ignored).
        let mut detections = Vec::new();
        for (pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[pos]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[pos + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            decode_stride(scores, bboxes, stride, &letterbox, &mut detections);
        }

        let mut regions = nms(detections, DET_NMS_THRESHOLD);
        regions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(regions)
    }
}

/// Decode anchor-free detections for a single stride level into frame
/// coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    out: &mut Vec<FaceRegion>,
) {
    let grid = DET_INPUT_SIZE / stride;
    let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= DET_CONFIDENCE_THRESHOLD {
            continue;
        }
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let anchor_cx = ((cell % grid) * stride) as f32;
        let anchor_cy = ((cell / grid) * stride) as f32;

        // Offsets are [left, top, right, bottom] distances in stride units.
        let x1 = anchor_cx - bboxes[off] * stride as f32;
        let y1 = anchor_cy - bboxes[off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[off + 3] * stride as f32;

        out.push(FaceRegion {
            x: (x1 - letterbox.pad_x) / letterbox.scale,
            y: (y1 - letterbox.pad_y) / letterbox.scale,
            width: (x2 - x1) / letterbox.scale,
            height: (y2 - y1) / letterbox.scale,
            confidence: score,
        });
    }
}

/// Non-maximum suppression over overlapping regions.
fn nms(mut regions: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    regions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceRegion> = Vec::new();
    for candidate in regions {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
