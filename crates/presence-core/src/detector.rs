//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the frame into a 640x640 tensor, decodes the three
//! anchor-free stride heads (8, 16, 32) into boxes and five-point landmarks,
//! and suppresses overlaps with greedy NMS.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::frame::Frame;
use crate::types::BoundingBox;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download from insightface and place in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer does not match its {width}x{height} dimensions")]
    InvalidFrame { width: u32, height: u32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Placement of the resized frame inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let side = SCRFD_INPUT_SIZE as f32;
        let scale = (side / width as f32).min(side / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        Self {
            scale,
            width: new_w,
            height: new_h,
            pad_x: (SCRFD_INPUT_SIZE - new_w) / 2,
            pad_y: (SCRFD_INPUT_SIZE - new_h) / 2,
        }
    }

    /// Map a point in model-input space back to frame coordinates.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(path = %model_path.display(), outputs = ?names, "loaded SCRFD model");

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }

        let outputs = named_outputs(&names).unwrap_or_else(|| {
            tracing::info!("SCRFD output names not recognized, using positional layout");
            positional_outputs()
        });

        Ok(Self { session, outputs })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = letterbox_tensor(frame)?;
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in self.outputs.iter().zip(SCRFD_STRIDES.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(slot.score, "scores")?;
            let bboxes = extract(slot.bbox, "bboxes")?;
            let kps = extract(slot.kps, "kps")?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Map outputs named `score_8`, `bbox_16`, `kps_32`, ... to their stride slots.
fn named_outputs(names: &[String]) -> Option<[StrideOutputs; 3]> {
    let find = |kind: &str, stride: usize| {
        let target = format!("{kind}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let slot = |stride: usize| {
        Some(StrideOutputs {
            score: find("score", stride)?,
            bbox: find("bbox", stride)?,
            kps: find("kps", stride)?,
        })
    };
    Some([
        slot(SCRFD_STRIDES[0])?,
        slot(SCRFD_STRIDES[1])?,
        slot(SCRFD_STRIDES[2])?,
    ])
}

/// Standard export order: scores 8/16/32, then bboxes, then kps.
fn positional_outputs() -> [StrideOutputs; 3] {
    std::array::from_fn(|i| StrideOutputs {
        score: i,
        bbox: i + 3,
        kps: i + 6,
    })
}

/// Resize the frame into the letterboxed NCHW input tensor.
///
/// Padding is left at zero, which is the normalized value of `SCRFD_MEAN`.
fn letterbox_tensor(frame: &Frame) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let invalid = || DetectorError::InvalidFrame {
        width: frame.width,
        height: frame.height,
    };
    if frame.width == 0 || frame.height == 0 {
        return Err(invalid());
    }
    let view = ImageBuffer::<Luma<u8>, &[u8]>::from_raw(frame.width, frame.height, frame.data.as_slice())
        .ok_or_else(invalid)?;

    let letterbox = Letterbox::fit(frame.width, frame.height);
    let resized = imageops::resize(&view, letterbox.width, letterbox.height, FilterType::Triangle);

    let side = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        let (tx, ty) = ((x + letterbox.pad_x) as usize, (y + letterbox.pad_y) as usize);
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = value;
        }
    }

    Ok((tensor, letterbox))
}

/// Decode one stride head into frame-space detections above threshold.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE as usize / stride;
    let s = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > SCRFD_CONFIDENCE_THRESHOLD)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * s;
            let cy = (cell / grid_w) as f32 * s;

            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.to_frame(cx - d[0] * s, cy - d[1] * s);
            let (x2, y2) = letterbox.to_frame(cx + d[2] * s, cy + d[3] * s);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.to_frame(cx + k[2 * i] * s, cy + k[2 * i + 1] * s))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression. Output is sorted by confidence, descending.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
