//! Face encoding seam between the attendance logic and the ONNX models.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Embedding;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Turns an RGB image into one embedding per detected face.
///
/// Embeddings are ordered by detector confidence, highest first. An image
/// with no detectable face yields an empty vector, not an error.
pub trait FaceEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EngineError>;
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for &mut E {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EngineError> {
        (**self).encode(image)
    }
}

/// SCRFD detection followed by ArcFace embedding for every face found.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EngineError> {
        let faces = self.detector.detect(image)?;
        let mut embeddings = Vec::with_capacity(faces.len());

        for face in &faces {
            if face.landmarks.is_none() {
                tracing::debug!(confidence = face.confidence, "skipping face without landmarks");
                continue;
            }
            embeddings.push(self.recognizer.extract(image, face)?);
        }

        tracing::trace!(faces = faces.len(), embedded = embeddings.len(), "encoded image");
        Ok(embeddings)
    }
}
