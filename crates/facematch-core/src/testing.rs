//! Test-only extractor that reads faces straight out of pixel colours.
//!
//! A stub image is a row of 10×10 stripes, one per face. Every pixel's red
//! channel holds the face count; green and blue hold the face's embedding
//! (divided by 100). A red value of 255 makes detection fail.

use crate::extractor::{EmbeddingExtractor, ExtractError};
use crate::pixels::PixelBuffer;
use crate::types::{BoundingBox, Embedding};
use image::{Rgb, RgbImage};
use std::path::Path;

const STRIPE: u32 = 10;
const FAIL_MARKER: u8 = 255;

#[derive(Default)]
pub(crate) struct StubExtractor {
    /// Number of `detect_faces` calls.
    pub calls: usize,
}

impl EmbeddingExtractor for StubExtractor {
    fn detect_faces(&mut self, image: &PixelBuffer) -> Result<Vec<BoundingBox>, ExtractError> {
        self.calls += 1;
        let count = image.get_pixel(0, 0)[0];
        if count == FAIL_MARKER {
            return Err(ExtractError::Detection("stub failure".into()));
        }
        Ok((0..count as u32)
            .map(|i| {
                let side = STRIPE as f32;
                BoundingBox::new((i * STRIPE) as f32, 0.0, side, side, 0.99)
            })
            .collect())
    }

    fn encode(
        &mut self,
        image: &PixelBuffer,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ExtractError> {
        boxes
            .iter()
            .map(|b| {
                let (cx, cy) = b.center();
                let (x, y) = (cx as u32, cy as u32);
                if x >= image.width() || y >= image.height() {
                    return Err(ExtractError::Encoding("box outside image".into()));
                }
                let p = image.get_pixel(x, y);
                Ok(Embedding::new(vec![p[1] as f32 / 100.0, p[2] as f32 / 100.0]))
            })
            .collect()
    }
}

/// Pixels for an image holding one face per `(g, b)` pair.
pub(crate) fn face_image(faces: &[(u8, u8)]) -> PixelBuffer {
    let stripes = faces.len().max(1) as u32;
    let mut image = RgbImage::from_pixel(stripes * STRIPE, STRIPE, Rgb([0, 0, 0]));
    for (i, &(g, b)) in faces.iter().enumerate() {
        for y in 0..STRIPE {
            for x in 0..STRIPE {
                image.put_pixel(i as u32 * STRIPE + x, y, Rgb([faces.len() as u8, g, b]));
            }
        }
    }
    image
}

/// The embedding the stub produces for a face drawn with `(g, b)`.
pub(crate) fn face_embedding(g: u8, b: u8) -> Embedding {
    Embedding::new(vec![g as f32 / 100.0, b as f32 / 100.0])
}

pub(crate) fn write_face_image(path: &Path, faces: &[(u8, u8)]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    face_image(faces).save(path).unwrap();
}

pub(crate) fn write_failing_image(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(STRIPE, STRIPE, Rgb([FAIL_MARKER, 0, 0]))
        .save(path)
        .unwrap();
}
