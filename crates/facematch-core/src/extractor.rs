//! Contract for the face detection + embedding backend.

use crate::matcher::DEFAULT_MATCH_THRESHOLD;
use crate::pixels::PixelBuffer;
use crate::types::{BoundingBox, Embedding};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("embedding extraction failed: {0}")]
    Encoding(String),
    #[error("extractor returned {embeddings} embeddings for {boxes} faces")]
    CountMismatch { boxes: usize, embeddings: usize },
}

/// Detects faces in an image and turns each detected face into an embedding.
///
/// Implementations take `&mut self` because inference sessions are stateful.
pub trait EmbeddingExtractor {
    /// Locate faces, in the backend's detection order.
    fn detect_faces(&mut self, image: &PixelBuffer) -> Result<Vec<BoundingBox>, ExtractError>;

    /// One embedding per box, same order as `boxes`.
    fn encode(
        &mut self,
        image: &PixelBuffer,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ExtractError>;

    /// Euclidean distance below which this backend's embeddings are the same person.
    fn recommended_threshold(&self) -> f32 {
        DEFAULT_MATCH_THRESHOLD
    }

    /// Detect then encode, pairing each box with its embedding.
    fn extract(
        &mut self,
        image: &PixelBuffer,
    ) -> Result<Vec<(BoundingBox, Embedding)>, ExtractError> {
        let boxes = self.detect_faces(image)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.encode(image, &boxes)?;
        if embeddings.len() != boxes.len() {
            return Err(ExtractError::CountMismatch {
                boxes: boxes.len(),
                embeddings: embeddings.len(),
            });
        }
        Ok(boxes.into_iter().zip(embeddings).collect())
    }
}

impl<E: EmbeddingExtractor + ?Sized> EmbeddingExtractor for Box<E> {
    fn recommended_threshold(&self) -> f32 {
        (**self).recommended_threshold()
    }

    fn detect_faces(&mut self, image: &PixelBuffer) -> Result<Vec<BoundingBox>, ExtractError> {
        (**self).detect_faces(image)
    }

    fn encode(
        &mut self,
        image: &PixelBuffer,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ExtractError> {
        (**self).encode(image, boxes)
    }
}
