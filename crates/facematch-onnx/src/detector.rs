//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the RGB input onto a square canvas, decodes the anchor-free
//! score/box/keypoint heads at strides 8, 16 and 32, and suppresses overlaps.

use facematch_core::{BoundingBox, PixelBuffer};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_PAD_VALUE: u8 = 128;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_KPS_PER_ANCHOR: usize = 10;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where an image sits inside the letterboxed canvas.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> (Self, u32, u32) {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        let letterbox = Self {
            scale,
            pad_x: (target - new_w) / 2,
            pad_y: (target - new_h) / 2,
        };
        (letterbox, new_w, new_h)
    }

    /// Canvas coordinates back to source-image coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor positions for one stride. `kps` is absent on models
/// exported without the landmark head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: Option<usize>,
}

pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.is_file() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, found {} outputs",
                names.len()
            )));
        }
        let outputs = output_layout(&names);
        if outputs.iter().any(|o| o.kps.is_none()) {
            tracing::warn!("SCRFD model has no keypoint outputs; faces will not be aligned");
        }

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            layout = ?outputs,
            "loaded SCRFD model"
        );

        Ok(Self { session, outputs })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, image: &PixelBuffer) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let slots = self.outputs[level];
            let (_, scores) = outputs[slots.score]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores @{stride}: {e}")))?;
            let (_, boxes) = outputs[slots.bbox]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes @{stride}: {e}")))?;
            let kps = match slots.kps {
                Some(slot) => Some(
                    outputs[slot]
                        .try_extract_tensor::<f32>()
                        .map_err(|e| DetectorError::InferenceFailed(format!("kps @{stride}: {e}")))?
                        .1,
                ),
                None => None,
            };

            candidates.extend(decode_level(
                Heads { scores, boxes, kps },
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces = suppress(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection");
        Ok(faces)
    }
}

/// Letterbox `image` onto the SCRFD canvas and normalize it into an NCHW tensor.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (letterbox, new_w, new_h) =
        Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(
        SCRFD_INPUT_SIZE,
        SCRFD_INPUT_SIZE,
        Rgb([SCRFD_PAD_VALUE; 3]),
    );
    imageops::replace(&mut canvas, &resized, letterbox.pad_x as i64, letterbox.pad_y as i64);

    let size = SCRFD_INPUT_SIZE as usize;
    let tensor = Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let p = canvas.get_pixel(x as u32, y as u32)[c] as f32;
        (p - SCRFD_MEAN) / SCRFD_STD
    });
    (tensor, letterbox)
}

/// Standard SCRFD export order: scores for all strides, then boxes, then keypoints.
const POSITIONAL_LAYOUT: [StrideOutputs; 3] = [
    StrideOutputs { score: 0, bbox: 3, kps: Some(6) },
    StrideOutputs { score: 1, bbox: 4, kps: Some(7) },
    StrideOutputs { score: 2, bbox: 5, kps: Some(8) },
];

/// Match outputs named `score_<stride>` / `bbox_<stride>` / `kps_<stride>`,
/// falling back to [`POSITIONAL_LAYOUT`] if a score or box head is missing.
/// Positional keypoints are dropped when the model has fewer than nine outputs.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let find = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut layout = POSITIONAL_LAYOUT;
    for (slot, &stride) in layout.iter_mut().zip(SCRFD_STRIDES.iter()) {
        let (Some(score), Some(bbox)) = (find("score", stride), find("bbox", stride)) else {
            tracing::debug!(?names, "SCRFD outputs not named by stride; using positional layout");
            let mut positional = POSITIONAL_LAYOUT;
            if names.len() < 9 {
                positional.iter_mut().for_each(|o| o.kps = None);
            }
            return positional;
        };
        *slot = StrideOutputs { score, bbox, kps: find("kps", stride) };
    }
    layout
}

/// Raw head outputs for one stride.
struct Heads<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    kps: Option<&'a [f32]>,
}

/// Decode one stride level. Box offsets are distances from the anchor
/// centre to each edge, and keypoints are offsets from the anchor centre,
/// both in units of the stride.
fn decode_level(
    heads: Heads<'_>,
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE as usize / stride;
    let step = stride as f32;

    heads
        .scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let offsets = heads.boxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * step;
            let ay = (cell / grid_w) as f32 * step;

            let (x1, y1) = letterbox.unmap(ax - offsets[0] * step, ay - offsets[1] * step);
            let (x2, y2) = letterbox.unmap(ax + offsets[2] * step, ay + offsets[3] * step);
            let mut face = BoundingBox::new(x1, y1, x2 - x1, y2 - y1, score);

            let start = idx * SCRFD_KPS_PER_ANCHOR;
            face.landmarks = heads
                .kps
                .and_then(|kps| kps.get(start..start + SCRFD_KPS_PER_ANCHOR))
                .map(|points| {
                    std::array::from_fn(|i| {
                        letterbox.unmap(ax + points[i * 2] * step, ay + points[i * 2 + 1] * step)
                    })
                });
            Some(face)
        })
        .collect()
}

/// Greedy non-maximum suppression. Output is sorted by confidence, highest first.
fn suppress(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}
