//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model on RGB frames with 3-stride anchor-free decoding and NMS
//! post-processing.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty frame")]
    EmptyFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    /// Fit a `width` × `height` frame centered inside a square model input.
    fn fit(width: u32, height: u32, input_size: usize) -> (Self, u32, u32) {
        let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_size as u32);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_size as u32);
        let pad_x = (input_size as u32 - new_w) as f32 / 2.0;
        let pad_y = (input_size as u32 - new_h) as f32 / 2.0;
        (Self { scale, pad_x, pad_y }, new_w, new_h)
    }

    /// Map a point from model input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// Raw tensors produced by one stride level.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Detect faces in an RGB frame, returning bounding boxes sorted by confidence.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::EmptyFrame);
        }

        let (input, letterbox) = preprocess(frame, self.input_size);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };

            let level = StrideOutputs {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            detections.extend(decode_stride(
                &level,
                self.input_size,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(detections, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox an RGB frame into a 1×3×N×N float tensor.
///
/// Bilinear (triangle) resize, padding filled with the mean so it normalizes to 0.
fn preprocess(frame: &RgbImage, input_size: usize) -> (Array4<f32>, Letterbox) {
    let (letterbox, new_w, new_h) = Letterbox::fit(frame.width(), frame.height(), input_size);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let pad_x = letterbox.pad_x.floor() as usize;
    let pad_y = letterbox.pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, input_size, input_size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = pad_x + x as usize;
        let ty = pad_y + y as usize;
        if tx >= input_size || ty >= input_size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Discover output tensor ordering by name.
///
/// Exports name tensors either "score_8", "bbox_16", "kps_32", ... or with
/// generic numbers. Unrecognized names fall back to the standard positional
/// ordering: [0-2] scores, [3-5] bboxes, [6-8] kps, each for strides 8/16/32.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(found) => {
            tracing::debug!("SCRFD: using name-based output tensor mapping");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::debug!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    level: &StrideOutputs<'_>,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let stride = level.stride as f32;
    let grid = input_size / level.stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = level.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * stride;
        let anchor_y = (cell / grid) as f32 * stride;

        // Distances from the anchor to the box edges, in stride units.
        let Some(off) = level.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.unmap(anchor_x - off[0] * stride, anchor_y - off[1] * stride);
        let (x2, y2) = letterbox.unmap(anchor_x + off[2] * stride, anchor_y + off[3] * stride);

        let landmarks = level.kps.get(idx * 10..idx * 10 + 10).map(|kps| {
            std::array::from_fn(|i| {
                letterbox.unmap(
                    anchor_x + kps[i * 2] * stride,
                    anchor_y + kps[i * 2 + 1] * stride,
                )
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression. Output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|kept| iou(kept, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter_area = inter_w * inter_h;
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
