//! Image normalization at the system boundary.
//!
//! Every image entering the engine goes through [`load_pixels`] once and is
//! handled as an 8-bit RGB [`PixelBuffer`] from then on.

use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Canonical pixel type consumed by the extractor and the session.
pub type PixelBuffer = RgbImage;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("image has zero width or height")]
    Empty,
}

/// The shapes an image can arrive in.
pub enum ImageSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
    Image(&'a DynamicImage),
}

impl<'a> From<&'a Path> for ImageSource<'a> {
    fn from(path: &'a Path) -> Self {
        ImageSource::Path(path)
    }
}

impl<'a> From<&'a [u8]> for ImageSource<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        ImageSource::Bytes(bytes)
    }
}

impl<'a> From<&'a DynamicImage> for ImageSource<'a> {
    fn from(image: &'a DynamicImage) -> Self {
        ImageSource::Image(image)
    }
}

/// Decode any supported source into an RGB pixel buffer.
pub fn load_pixels<'a>(source: impl Into<ImageSource<'a>>) -> Result<PixelBuffer, ImageError> {
    let rgb = match source.into() {
        ImageSource::Path(path) => {
            if !path.is_file() {
                return Err(ImageError::NotFound(path.to_path_buf()));
            }
            image::open(path)
                .map_err(|source| ImageError::Decode {
                    path: path.display().to_string(),
                    source,
                })?
                .to_rgb8()
        }
        ImageSource::Bytes(bytes) => image::load_from_memory(bytes)
            .map_err(|source| ImageError::Decode {
                path: "<memory>".to_string(),
                source,
            })?
            .to_rgb8(),
        ImageSource::Image(image) => image.to_rgb8(),
    };

    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(ImageError::Empty);
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    #[test]
    fn test_load_missing_path() {
        let err = load_pixels(Path::new("/nonexistent/face.png")).unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
    }

    #[test]
    fn test_load_garbage_bytes() {
        let err = load_pixels(&b"definitely not a png"[..]).unwrap_err();
        assert!(matches!(err, ImageError::Decode { .. }));
    }

    #[test]
    fn test_grayscale_is_expanded_to_rgb() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 3, Luma([77])));
        let rgb = load_pixels(&gray).unwrap();
        assert_eq!(rgb.dimensions(), (4, 3));
        assert_eq!(*rgb.get_pixel(2, 1), Rgb([77, 77, 77]));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        RgbImage::from_pixel(2, 2, Rgb([10, 20, 30])).save(&path).unwrap();

        let rgb = load_pixels(path.as_path()).unwrap();
        assert_eq!(*rgb.get_pixel(1, 1), Rgb([10, 20, 30]));
    }
}
