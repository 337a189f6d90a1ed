//! ArcFace face recognizer via ONNX Runtime.
//!
//! Warps a detected face onto the five-point ArcFace template (or, without
//! landmarks, takes a padded square crop resized to 112×112) and returns an
//! L2-normalized 512-dimensional embedding.

use crate::alignment::align_face;
use facematch_core::{BoundingBox, Embedding, PixelBuffer};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128
const ARCFACE_EMBEDDING_DIM: usize = 512;
/// Context kept around the detector box, per side, as a fraction of its longer edge.
const CROP_MARGIN: f32 = 0.25;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the image")]
    EmptyRegion,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.is_file() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Embed the face inside `face`.
    pub fn embed(
        &mut self,
        image: &PixelBuffer,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let input = preprocess(&face_crop(image, face)?);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding output: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// The face as the recognizer should see it: aligned on its landmarks when
/// the detector found them, otherwise a padded square crop.
fn face_crop(image: &PixelBuffer, face: &BoundingBox) -> Result<RgbImage, RecognizerError> {
    let (x, y, side) =
        square_region(face, image.width(), image.height()).ok_or(RecognizerError::EmptyRegion)?;
    Ok(match &face.landmarks {
        Some(landmarks) => align_face(image, landmarks),
        None => imageops::crop_imm(image, x, y, side, side).to_image(),
    })
}

/// Square `(x, y, side)` centred on the face, padded by [`CROP_MARGIN`] and
/// shrunk as needed to stay inside the image.
fn square_region(face: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32)> {
    let (cx, cy) = face.center();
    let half = face.width.max(face.height) * (0.5 + CROP_MARGIN);

    let x0 = (cx - half).max(0.0);
    let y0 = (cy - half).max(0.0);
    let x1 = (cx + half).min(width as f32);
    let y1 = (cy + half).min(height as f32);

    let side = (x1 - x0).min(y1 - y0).floor();
    if side < 1.0 {
        return None;
    }
    Some((x0.floor() as u32, y0.floor() as u32, side as u32))
}

/// Resize a face crop to 112×112 if needed and normalize it into an NCHW tensor.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE;
    let aligned = if crop.dimensions() == (size, size) {
        crop.clone()
    } else {
        imageops::resize(crop, size, size, FilterType::Triangle)
    };
    let size = ARCFACE_INPUT_SIZE as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        (aligned.get_pixel(x as u32, y as u32)[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD
    })
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
