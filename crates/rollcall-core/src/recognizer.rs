//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional face embeddings from aligned RGB face crops,
//! using the w600k_r50 ArcFace model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0 — ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract an L2-normalized embedding for one detected face in an RGB frame.
    ///
    /// The face must carry landmarks; it is aligned to the canonical
    /// 112x112 position before inference.
    pub fn extract(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(frame, landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

/// Convert a 112x112 RGB crop into a 1×3×112×112 tensor (R, G, B planes).
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));

    for (x, y, pixel) in aligned.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= ALIGNED_SIZE || y >= ALIGNED_SIZE {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    tensor
}
