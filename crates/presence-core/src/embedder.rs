//! The face-embedding capability: image in, zero or more embeddings out,
//! plus the same-person rule used to compare them.

use std::path::Path;

use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::frame::Frame;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Comparison, Embedding};

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("embedding backend failed: {0}")]
    Backend(String),
}

/// Extracts face embeddings from a frame and decides whether two embeddings
/// belong to the same person.
///
/// Implementations are owned by a single engine thread, so `embed` may take
/// `&mut self`.
pub trait FaceEmbedder: Send {
    /// One embedding per detected face, highest detector confidence first.
    /// An empty vector means no face was found.
    fn embed(&mut self, frame: &Frame) -> Result<Vec<Embedding>, EmbedError>;

    fn same_person(&self, known: &Embedding, probe: &Embedding) -> bool;

    /// The comparison rule in effect, for status reporting.
    fn comparison(&self) -> Comparison;
}

/// SCRFD detection + ArcFace recognition over ONNX Runtime.
pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    comparison: Comparison,
}

impl OnnxEmbedder {
    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
    pub fn load(model_dir: &Path, comparison: Comparison) -> Result<Self, EmbedError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
            comparison,
        })
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(&mut self, frame: &Frame) -> Result<Vec<Embedding>, EmbedError> {
        let faces = self.detector.detect(frame)?;
        tracing::debug!(faces = faces.len(), "detected faces");

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            match self.recognizer.extract(frame, face) {
                Ok(embedding) => embeddings.push(embedding),
                // A face the detector returned without landmarks cannot be
                // aligned; skip it rather than failing the whole image.
                Err(RecognizerError::NoLandmarks) => {
                    tracing::warn!(confidence = face.confidence, "face without landmarks skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(embeddings)
    }

    fn same_person(&self, known: &Embedding, probe: &Embedding) -> bool {
        self.comparison.same_person(known, probe)
    }

    fn comparison(&self) -> Comparison {
        self.comparison
    }
}
