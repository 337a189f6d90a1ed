//! facematch-onnx — ONNX Runtime backend for the facematch extractor contract.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both on CPU.

pub mod alignment;
pub mod detector;
pub mod recognizer;

pub use detector::{DetectorError, FaceDetector};
pub use recognizer::{FaceRecognizer, RecognizerError};

use facematch_core::{BoundingBox, Embedding, EmbeddingExtractor, ExtractError, PixelBuffer};
use std::path::Path;
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl From<DetectorError> for ExtractError {
    fn from(e: DetectorError) -> Self {
        ExtractError::Detection(e.to_string())
    }
}

impl From<RecognizerError> for ExtractError {
    fn from(e: RecognizerError) -> Self {
        ExtractError::Encoding(e.to_string())
    }
}

/// SCRFD + ArcFace extractor.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    /// Euclidean match threshold for these embeddings.
    ///
    /// ArcFace vectors are unit length, so a cosine similarity of 0.40
    /// corresponds to a distance of `sqrt(2 * (1 - 0.40))`.
    pub const RECOMMENDED_THRESHOLD: f32 = 1.0954;

    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, LoadError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn recommended_threshold(&self) -> f32 {
        Self::RECOMMENDED_THRESHOLD
    }

    fn detect_faces(&mut self, image: &PixelBuffer) -> Result<Vec<BoundingBox>, ExtractError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(
        &mut self,
        image: &PixelBuffer,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ExtractError> {
        boxes
            .iter()
            .map(|face| self.recognizer.embed(image, face).map_err(ExtractError::from))
            .collect()
    }
}
